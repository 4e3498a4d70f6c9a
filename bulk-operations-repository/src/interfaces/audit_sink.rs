//! Audit sink interface.

use async_trait::async_trait;
use bulk_operations_shared::{AuditEvent, AuditEventType, AuditSeverity};
use serde_json::{json, Map, Value};

use crate::errors::AuditError;

/// Destination for audit events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record a single event.
    async fn log(&self, event: &AuditEvent) -> Result<(), AuditError>;

    /// Record a bulk mutation over `target_ids`.
    ///
    /// Builds a `HIGH` severity `BULK_OPERATION` event tagged `bulk` and
    /// `mass-operation`. The given metadata is extended with the affected ids,
    /// the operation name and the item count.
    async fn log_bulk_operation(
        &self,
        caller_id: &str,
        event_type: AuditEventType,
        operation: &str,
        target_ids: &[String],
        metadata: Map<String, Value>,
    ) -> Result<(), AuditError> {
        let mut metadata = metadata;
        metadata.insert("affected_resources".to_string(), json!(target_ids));
        metadata.insert("operation_type".to_string(), json!(operation));
        metadata.insert("item_count".to_string(), json!(target_ids.len()));

        let event = AuditEvent::new(
            event_type,
            AuditSeverity::High,
            caller_id,
            "BULK_OPERATION",
            format!("Bulk operation: {} ({} items)", operation, target_ids.len()),
        )
        .with_metadata(metadata)
        .with_tags(["bulk", "mass-operation"]);

        self.log(&event).await
    }
}
