//! PostgreSQL implementations of the repository interfaces.
//!
//! ## Database Tables
//!
//! - `documents`: schemaless JSONB documents keyed by `(collection, id)`
//! - `audit_logs`: audit events
//!
//! Both tables are created by the migrations in `src/postgres/migrations`.

mod audit_sink;
mod document_store;

pub use audit_sink::PostgresAuditSink;
pub use document_store::PostgresDocumentStore;

/// Run the bundled migrations against `pool`.
pub async fn run_migrations(pool: &sqlx::PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("src/postgres/migrations").run(pool).await
}
