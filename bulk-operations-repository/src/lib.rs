//! # Bulk Operations Repository
//!
//! Collaborator interfaces used by the bulk operation orchestrator, and their
//! implementations. A [`DocumentStore`] persists schemaless documents grouped
//! in collections; an [`AuditSink`] records audit events.
//!
//! Implementations are provided for tests and tooling (in-memory), for
//! structured logs (tracing) and for production (PostgreSQL).

pub mod errors;
pub mod interfaces;
pub mod memory;
pub mod postgres;
pub mod tracing_sink;

pub use errors::{AuditError, StoreError};
pub use interfaces::{AuditSink, DocumentStore, MAX_IDS_PER_LOOKUP};
pub use memory::{InMemoryDocumentStore, MemoryAuditSink};
pub use postgres::{run_migrations, PostgresAuditSink, PostgresDocumentStore};
pub use tracing_sink::TracingAuditSink;
