//! Queue abstraction used to run batches.
//!
//! Every batch of a bulk operation is handed to an [`OperationQueue`] as a
//! boxed future. The queue decides when the work may run and propagates its
//! error unchanged.

mod rate_limit;

use std::time::Duration;

use async_trait::async_trait;
use bulk_operations_repository::StoreError;
use futures::future::BoxFuture;

use crate::errors::QueueError;

pub use rate_limit::{KeyStatus, QueueMetrics, RateLimitConfig, RateLimitQueue};

/// Default priority of queued work.
pub const DEFAULT_PRIORITY: u8 = 5;

/// Default time a work may wait for admission.
pub const DEFAULT_QUEUE_TIMEOUT: Duration = Duration::from_secs(30);

/// A unit of queued work.
pub type QueueWork<'a> = BoxFuture<'a, Result<(), StoreError>>;

/// Scheduling options of a single queued work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOptions {
    /// Higher values are admitted first.
    pub priority: u8,
    /// Maximum time spent waiting for admission.
    pub timeout: Duration,
    /// Bypass the request window checks for this work.
    pub skip_rate_limit: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            priority: DEFAULT_PRIORITY,
            timeout: DEFAULT_QUEUE_TIMEOUT,
            skip_rate_limit: false,
        }
    }
}

impl QueueOptions {
    pub fn new(priority: u8, timeout: Duration) -> Self {
        Self {
            priority,
            timeout,
            skip_rate_limit: false,
        }
    }

    pub fn skip_rate_limit(mut self) -> Self {
        self.skip_rate_limit = true;
        self
    }
}

/// Runs work under a per-key admission policy.
#[async_trait]
pub trait OperationQueue: Send + Sync {
    /// Run `work` once it is admitted for `key`.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The work ran and succeeded
    /// * `Err(QueueError::Work)` - The work ran and failed
    /// * `Err(QueueError)` - The work was never run
    async fn queue_operation<'a>(
        &self,
        key: &str,
        work: QueueWork<'a>,
        options: QueueOptions,
    ) -> Result<(), QueueError>;
}

/// Queue that runs every work immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnboundedQueue;

impl UnboundedQueue {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl OperationQueue for UnboundedQueue {
    async fn queue_operation<'a>(
        &self,
        _key: &str,
        work: QueueWork<'a>,
        _options: QueueOptions,
    ) -> Result<(), QueueError> {
        work.await.map_err(QueueError::Work)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[tokio::test]
    async fn test_unbounded_queue_propagates_work_error() {
        let queue = UnboundedQueue::new();

        queue
            .queue_operation("k", async { Ok(()) }.boxed(), QueueOptions::default())
            .await
            .unwrap();

        let err = queue
            .queue_operation(
                "k",
                async { Err(StoreError::unavailable("down")) }.boxed(),
                QueueOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Work(StoreError::Unavailable(_))));
    }
}
