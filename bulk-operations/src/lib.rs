//! # Bulk Operations
//!
//! Orchestrates bulk create, update and delete operations over a document
//! store without overwhelming it.
//!
//! ## Architecture
//!
//! An operation flows through the following components:
//!
//! 1. **Validation**: rejects empty, oversized or unconfirmed requests
//! 2. **Batching**: splits the items into ordered, fixed-size batches
//! 3. **Queue**: runs each batch under a per-caller concurrency and rate limit
//! 4. **Tracker**: keeps per-operation progress and notifies callers
//! 5. **Orchestrator**: aggregates outcomes and emits audit events
//!
//! ## Modules
//!
//! - [`batching`]: Batch splitting
//! - [`config`]: Configuration and dependency initialization
//! - [`errors`]: Error types for the orchestrator
//! - [`orchestrator`]: The bulk operation service
//! - [`queue`]: Queue abstraction and the rate-limited implementation
//! - [`tracker`]: Progress tracking of active operations

pub mod batching;
pub mod config;
pub mod errors;
pub mod orchestrator;
pub mod queue;
pub mod tracker;

pub use config::Dependencies;
pub use errors::{BulkError, QueueError};
pub use orchestrator::{
    AuditPolicy, BulkConfig, BulkLimits, BulkOperationService, CreateOptions, DeleteOptions,
    OperationOptions, UpdateOptions, Validator,
};
pub use queue::{OperationQueue, QueueOptions, RateLimitConfig, RateLimitQueue, UnboundedQueue};
pub use tracker::{ProgressCallback, ProgressTracker};
