//! # Bulk Operations Shared
//!
//! This crate defines shared data structures and types used across the bulk
//! operation crates: operation descriptors, filters, progress snapshots,
//! results, documents and audit events.

pub mod types;

pub use types::audit_event::{AuditErrorInfo, AuditEvent, AuditEventType, AuditSeverity};
pub use types::document::{Document, DocumentUpdate, StoredDocument};
pub use types::operation::{BulkFilter, BulkOperation, BulkOperationType, FilterOperator};
pub use types::progress::{BulkOperationProgress, OperationStatus, StatusTransitionError};
pub use types::result::{BulkOperationResult, ItemOutcome};
