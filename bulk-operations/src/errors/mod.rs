//! Error types for the bulk operation orchestrator.

use std::time::Duration;

use bulk_operations_repository::{AuditError, StoreError};
use bulk_operations_shared::{StatusTransitionError, StoredDocument};
use thiserror::Error;

/// Errors returned by the bulk operation entry points.
#[derive(Error, Debug)]
pub enum BulkError {
    /// The request is malformed (e.g. an empty item list).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// More items than allowed for this kind of operation.
    #[error("Limit exceeded: {provided} items provided, maximum is {max}")]
    LimitExceeded { provided: usize, max: usize },

    /// A large delete was submitted without a confirmation token.
    #[error("Confirmation token required to delete {count} items (threshold {threshold})")]
    ConfirmationRequired { count: usize, threshold: usize },

    /// Documents were rejected by the caller-supplied validator.
    #[error("Validation failed: {invalid} of {total} documents are invalid")]
    ValidationFailed { invalid: usize, total: usize },

    /// The failure threshold was crossed and the operation was aborted.
    #[error("Too many failures: {errors} of {total} items failed, operation aborted")]
    TooManyFailures { errors: usize, total: usize },

    /// A delete with a backup stopped after it may already have removed
    /// documents. `backup` holds every targeted document as it was before the
    /// first batch ran.
    #[error("{source} ({} documents backed up)", .backup.len())]
    Aborted {
        source: Box<BulkError>,
        backup: Vec<StoredDocument>,
    },

    /// A batch failed in a way that is not a store error.
    #[error("Batch execution error: {0}")]
    BatchExecution(String),

    #[error("Operation not found: {0}")]
    OperationNotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(#[from] StatusTransitionError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BulkError {
    /// Create an invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a batch execution error.
    pub fn batch_execution(msg: impl Into<String>) -> Self {
        Self::BatchExecution(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Attach a pre-delete backup to the error that aborted the delete.
    pub fn with_backup(self, backup: Vec<StoredDocument>) -> Self {
        Self::Aborted {
            source: Box::new(self),
            backup,
        }
    }

    /// Documents backed up before an aborted delete.
    pub fn backup(&self) -> Option<&[StoredDocument]> {
        match self {
            Self::Aborted { backup, .. } => Some(backup),
            _ => None,
        }
    }

    /// The error that stopped the operation, looking through [`Self::Aborted`].
    pub fn cause(&self) -> &BulkError {
        match self {
            Self::Aborted { source, .. } => source.cause(),
            other => other,
        }
    }
}

/// Errors returned by an [`OperationQueue`](crate::queue::OperationQueue).
#[derive(Error, Debug)]
pub enum QueueError {
    /// The key exceeded its request window and is blocked.
    #[error("Rate limit exceeded for {key}, retry after {retry_after:?}")]
    RateLimited { key: String, retry_after: Duration },

    /// The work was not admitted before its deadline.
    #[error("Queue timeout after {0:?}")]
    Timeout(Duration),

    /// The work itself failed.
    #[error(transparent)]
    Work(#[from] StoreError),
}
