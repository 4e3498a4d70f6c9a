//! Progress tracking of active bulk operations.
//!
//! The tracker keeps the latest snapshot of every running operation so that
//! other tasks can query or cancel it. Callbacks are always invoked outside
//! the tracker lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bulk_operations_shared::{BulkOperationProgress, OperationStatus};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::debug;

use crate::errors::BulkError;

/// Caller-supplied observer of progress updates.
pub type ProgressCallback = Arc<dyn Fn(&BulkOperationProgress) + Send + Sync>;

struct TrackedOperation {
    progress: BulkOperationProgress,
    callback: Option<ProgressCallback>,
}

/// Registry of the operations currently in flight.
#[derive(Default)]
pub struct ProgressTracker {
    operations: Mutex<HashMap<String, TrackedOperation>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TrackedOperation>> {
        self.operations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start tracking an operation.
    pub fn register(&self, progress: BulkOperationProgress, callback: Option<ProgressCallback>) {
        debug!(operation_id = %progress.operation_id, total = progress.total, "Tracking operation");
        self.lock().insert(
            progress.operation_id.clone(),
            TrackedOperation { progress, callback },
        );
    }

    /// Replace the snapshot of a tracked operation.
    ///
    /// Returns `false` when the operation is no longer tracked, e.g. after it
    /// was cancelled.
    pub fn update(&self, progress: &BulkOperationProgress) -> bool {
        match self.lock().get_mut(&progress.operation_id) {
            Some(tracked) => {
                tracked.progress = progress.clone();
                true
            }
            None => false,
        }
    }

    /// Stop tracking an operation.
    pub fn remove(&self, operation_id: &str) {
        self.lock().remove(operation_id);
    }

    /// Latest snapshot of an operation, if it is still tracked.
    pub fn get_operation_progress(&self, operation_id: &str) -> Option<BulkOperationProgress> {
        self.lock()
            .get(operation_id)
            .map(|tracked| tracked.progress.clone())
    }

    /// Snapshots of every tracked operation.
    pub fn get_active_operations(&self) -> Vec<BulkOperationProgress> {
        self.lock()
            .values()
            .map(|tracked| tracked.progress.clone())
            .collect()
    }

    /// Check that an operation is tracked and may still be cancelled.
    pub fn ensure_cancellable(&self, operation_id: &str) -> Result<(), BulkError> {
        let operations = self.lock();
        let tracked = operations
            .get(operation_id)
            .ok_or_else(|| BulkError::OperationNotFound(operation_id.to_string()))?;
        tracked
            .progress
            .clone()
            .advance_to(OperationStatus::Cancelled)?;
        Ok(())
    }

    /// Mark an operation `Cancelled` and stop tracking it.
    ///
    /// Returns the cancelled snapshot together with the callback, which the
    /// caller is expected to notify.
    pub fn cancel(
        &self,
        operation_id: &str,
    ) -> Result<(BulkOperationProgress, Option<ProgressCallback>), BulkError> {
        let mut operations = self.lock();
        let tracked = operations
            .get_mut(operation_id)
            .ok_or_else(|| BulkError::OperationNotFound(operation_id.to_string()))?;
        tracked.progress.advance_to(OperationStatus::Cancelled)?;

        let tracked = operations
            .remove(operation_id)
            .ok_or_else(|| BulkError::OperationNotFound(operation_id.to_string()))?;
        Ok((tracked.progress, tracked.callback))
    }
}

/// Local progress of one running operation.
///
/// Publishes every change to the tracker (when tracked) and to the callback.
/// Dropping the handle removes the operation from the tracker, on success,
/// on error and on panic alike.
pub struct OperationHandle<'t> {
    tracker: Option<&'t ProgressTracker>,
    progress: BulkOperationProgress,
    callback: Option<ProgressCallback>,
}

impl<'t> OperationHandle<'t> {
    /// Create a handle, registering it with `tracker` when given.
    pub fn new(
        tracker: Option<&'t ProgressTracker>,
        progress: BulkOperationProgress,
        callback: Option<ProgressCallback>,
    ) -> Self {
        if let Some(tracker) = tracker {
            tracker.register(progress.clone(), callback.clone());
        }
        Self {
            tracker,
            progress,
            callback,
        }
    }

    pub fn progress(&self) -> &BulkOperationProgress {
        &self.progress
    }

    pub fn progress_mut(&mut self) -> &mut BulkOperationProgress {
        &mut self.progress
    }

    /// Push the current snapshot to the tracker and the callback.
    ///
    /// Once the operation has been cancelled no further callbacks fire.
    pub fn publish(&mut self) {
        if let Some(tracker) = self.tracker {
            if !tracker.update(&self.progress) {
                self.callback = None;
                return;
            }
        }
        if let Some(callback) = &self.callback {
            callback(&self.progress);
        }
    }

    /// Move to `status` and publish.
    pub fn transition(&mut self, status: OperationStatus) -> Result<(), BulkError> {
        self.progress.advance_to(status)?;
        self.publish();
        Ok(())
    }

    /// Mark the operation `Failed` unless it already reached a terminal status.
    pub fn mark_failed(&mut self) {
        if self.progress.advance_to(OperationStatus::Failed).is_ok() {
            self.publish();
        }
    }
}

impl Drop for OperationHandle<'_> {
    fn drop(&mut self) {
        if let Some(tracker) = self.tracker {
            tracker.remove(&self.progress.operation_id);
        }
    }
}

/// Estimated completion time after `completed` of `total` batches.
///
/// Average elapsed time per completed batch times the remaining batches.
pub fn estimate_completion(
    start: DateTime<Utc>,
    now: DateTime<Utc>,
    completed: usize,
    total: usize,
) -> Option<DateTime<Utc>> {
    if completed == 0 {
        return None;
    }
    let elapsed = (now - start).num_milliseconds().max(0);
    let per_batch = elapsed / completed as i64;
    let remaining = total.saturating_sub(completed) as i64;
    Some(now + ChronoDuration::milliseconds(per_batch * remaining))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_callback() -> (ProgressCallback, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let callback: ProgressCallback = Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (callback, calls)
    }

    #[test]
    fn test_handle_registers_and_cleans_up() {
        let tracker = ProgressTracker::new();
        {
            let mut handle =
                OperationHandle::new(Some(&tracker), BulkOperationProgress::new("op-1", 4), None);
            handle.transition(OperationStatus::Running).unwrap();
            handle.progress_mut().record_processed(2);
            handle.publish();

            let snapshot = tracker.get_operation_progress("op-1").unwrap();
            assert_eq!(snapshot.status, OperationStatus::Running);
            assert_eq!(snapshot.processed, 2);
            assert_eq!(tracker.get_active_operations().len(), 1);
        }
        assert!(tracker.get_operation_progress("op-1").is_none());
        assert!(tracker.get_active_operations().is_empty());
    }

    #[test]
    fn test_cancel_stops_callbacks() {
        let tracker = ProgressTracker::new();
        let (callback, calls) = counting_callback();
        let mut handle = OperationHandle::new(
            Some(&tracker),
            BulkOperationProgress::new("op-1", 4),
            Some(callback),
        );
        handle.transition(OperationStatus::Running).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let (snapshot, callback) = tracker.cancel("op-1").unwrap();
        assert_eq!(snapshot.status, OperationStatus::Cancelled);
        assert!(callback.is_some());
        assert!(tracker.get_operation_progress("op-1").is_none());

        handle.progress_mut().record_processed(4);
        handle.publish();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_unknown_operation() {
        let tracker = ProgressTracker::new();
        assert!(matches!(
            tracker.cancel("missing"),
            Err(BulkError::OperationNotFound(id)) if id == "missing"
        ));
    }

    #[test]
    fn test_ensure_cancellable_leaves_operation_tracked() {
        let tracker = ProgressTracker::new();
        let mut handle =
            OperationHandle::new(Some(&tracker), BulkOperationProgress::new("op-1", 2), None);
        handle.transition(OperationStatus::Running).unwrap();

        tracker.ensure_cancellable("op-1").unwrap();
        let snapshot = tracker.get_operation_progress("op-1").unwrap();
        assert_eq!(snapshot.status, OperationStatus::Running);

        handle.transition(OperationStatus::Completed).unwrap();
        assert!(matches!(
            tracker.ensure_cancellable("op-1"),
            Err(BulkError::InvalidState(_))
        ));
        assert!(matches!(
            tracker.ensure_cancellable("missing"),
            Err(BulkError::OperationNotFound(_))
        ));
    }

    #[test]
    fn test_untracked_handle_still_notifies() {
        let tracker = ProgressTracker::new();
        let (callback, calls) = counting_callback();
        let mut handle =
            OperationHandle::new(None, BulkOperationProgress::new("op-1", 1), Some(callback));
        handle.transition(OperationStatus::Running).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(tracker.get_active_operations().is_empty());
    }

    #[test]
    fn test_mark_failed_keeps_terminal_status() {
        let mut handle = OperationHandle::new(None, BulkOperationProgress::new("op-1", 1), None);
        handle.transition(OperationStatus::Running).unwrap();
        handle.transition(OperationStatus::Completed).unwrap();
        handle.mark_failed();
        assert_eq!(handle.progress().status, OperationStatus::Completed);
    }

    #[test]
    fn test_estimate_completion() {
        let start = Utc::now();
        let now = start + ChronoDuration::seconds(10);

        assert_eq!(estimate_completion(start, now, 0, 4), None);
        assert_eq!(
            estimate_completion(start, now, 2, 4),
            Some(now + ChronoDuration::seconds(10))
        );
        assert_eq!(estimate_completion(start, now, 4, 4), Some(now));
    }
}
