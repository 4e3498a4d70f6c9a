//! Collaborator interfaces of the bulk operation orchestrator.

mod audit_sink;
mod document_store;

pub use audit_sink::AuditSink;
pub use document_store::{DocumentStore, MAX_IDS_PER_LOOKUP};
