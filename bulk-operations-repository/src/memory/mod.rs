//! In-memory implementations for tests and local tooling.

mod audit_sink;
mod document_store;

pub use audit_sink::MemoryAuditSink;
pub use document_store::InMemoryDocumentStore;
