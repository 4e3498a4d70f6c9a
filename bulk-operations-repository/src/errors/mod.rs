//! Error types for the bulk operations repository.

mod audit_error;
mod store_error;

pub use audit_error::AuditError;
pub use store_error::StoreError;
