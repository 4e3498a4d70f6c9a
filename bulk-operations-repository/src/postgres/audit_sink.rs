//! PostgreSQL audit sink writing to the `audit_logs` table.

use async_trait::async_trait;
use bulk_operations_shared::AuditEvent;
use sqlx::types::Json;
use uuid::Uuid;

use crate::errors::AuditError;
use crate::interfaces::AuditSink;

pub struct PostgresAuditSink {
    pool: sqlx::PgPool,
}

impl PostgresAuditSink {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PostgresAuditSink {
    async fn log(&self, event: &AuditEvent) -> Result<(), AuditError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, event_type, severity, caller_id, action, description,
                resource_type, metadata, error_code, error_message, tags, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event.event_type.as_str())
        .bind(event.severity.as_str())
        .bind(&event.caller_id)
        .bind(&event.action)
        .bind(&event.description)
        .bind(event.resource_type.as_deref())
        .bind(Json(&event.metadata))
        .bind(event.error.as_ref().map(|e| e.code.as_str()))
        .bind(event.error.as_ref().map(|e| e.message.as_str()))
        .bind(&event.tags)
        .bind(event.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
