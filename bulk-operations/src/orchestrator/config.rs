//! Configuration types for the BulkOperationService.

use std::time::Duration;

use bulk_operations_repository::MAX_IDS_PER_LOOKUP;

/// What to do when the audit sink fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuditPolicy {
    /// Log the failure with `warn!` and carry on.
    #[default]
    BestEffort,
    /// Fail the operation with `BulkError::Audit`.
    Required,
}

impl AuditPolicy {
    /// Parse `best-effort` or `required` (case-insensitive).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "best-effort" | "best_effort" | "besteffort" => Some(Self::BestEffort),
            "required" => Some(Self::Required),
            _ => None,
        }
    }
}

/// Per-operation item limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkLimits {
    pub max_update_items: usize,
    pub max_create_items: usize,
    pub max_delete_items: usize,
    /// Deletes larger than this require a confirmation token.
    pub delete_confirmation_threshold: usize,
}

impl Default for BulkLimits {
    fn default() -> Self {
        Self {
            max_update_items: 10_000,
            max_create_items: 10_000,
            max_delete_items: 5_000,
            delete_confirmation_threshold: 100,
        }
    }
}

/// Configuration for the BulkOperationService.
///
/// Batches of one operation always run sequentially; concurrency across
/// operations is bounded by the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkConfig {
    /// Maximum number of items per batch. Must be greater than zero.
    pub max_batch_size: usize,
    /// Pause between two consecutive batches of the same operation.
    pub delay_between_batches: Duration,
    /// Maximum time a batch may wait for queue admission.
    pub timeout_per_batch: Duration,
    /// Register operations with the progress tracker.
    pub enable_progress_tracking: bool,
    /// Abort once more than this fraction of the items failed.
    pub failure_threshold: f64,
    pub audit_policy: AuditPolicy,
    /// Simulated write time of a dry-run batch.
    pub dry_run_latency: Duration,
    /// Ids per lookup when backing up documents before a delete.
    pub backup_lookup_chunk: usize,
    pub limits: BulkLimits,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 500,
            delay_between_batches: Duration::from_millis(1000),
            timeout_per_batch: Duration::from_millis(30_000),
            enable_progress_tracking: true,
            failure_threshold: 0.5,
            audit_policy: AuditPolicy::BestEffort,
            dry_run_latency: Duration::from_millis(100),
            backup_lookup_chunk: MAX_IDS_PER_LOOKUP,
            limits: BulkLimits::default(),
        }
    }
}

impl BulkConfig {
    /// Default configuration without pauses between batches.
    ///
    /// Useful for tools and tests that talk to a local store.
    pub fn without_delays() -> Self {
        Self {
            delay_between_batches: Duration::ZERO,
            dry_run_latency: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Set the maximum batch size.
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    pub fn with_audit_policy(mut self, audit_policy: AuditPolicy) -> Self {
        self.audit_policy = audit_policy;
        self
    }
}
