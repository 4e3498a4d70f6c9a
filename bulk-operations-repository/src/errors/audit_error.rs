//! Audit sink error types.

use thiserror::Error;

/// Errors returned by [`AuditSink`](crate::AuditSink) implementations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuditError {
    #[error("Audit write error: {0}")]
    Write(String),

    #[error("Audit serialization error: {0}")]
    Serialization(String),
}

impl AuditError {
    pub fn write(msg: impl Into<String>) -> Self {
        Self::Write(msg.into())
    }
}

impl From<sqlx::Error> for AuditError {
    fn from(err: sqlx::Error) -> Self {
        Self::Write(err.to_string())
    }
}

impl From<serde_json::Error> for AuditError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
