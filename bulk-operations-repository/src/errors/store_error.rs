//! Document store error types.

use thiserror::Error;

/// Errors returned by [`DocumentStore`](crate::DocumentStore) implementations.
///
/// Carries plain messages so that errors can be cloned into per-item outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// One or more targeted documents do not exist.
    #[error("Document not found: {0}")]
    NotFound(String),

    /// The backing database rejected or failed the request.
    #[error("Database error: {0}")]
    Database(String),

    /// A document could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A filter or request could not be turned into a query.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// More ids were passed to a single lookup than the store accepts.
    #[error("Lookup of {provided} ids exceeds maximum {max}")]
    LookupLimitExceeded { provided: usize, max: usize },

    /// The store cannot serve requests right now.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    pub fn invalid_query(msg: impl Into<String>) -> Self {
        Self::InvalidQuery(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                Self::Unavailable(err.to_string())
            }
            sqlx::Error::RowNotFound => Self::NotFound(err.to_string()),
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
