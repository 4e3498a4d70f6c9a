//! Audit events emitted around bulk operation lifecycles.

use std::sync::Arc;

use bulk_operations_repository::AuditSink;
use bulk_operations_shared::{
    AuditEvent, AuditEventType, AuditSeverity, BulkOperationResult, BulkOperationType,
};
use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::warn;

use super::config::AuditPolicy;
use crate::errors::BulkError;

fn event_type(kind: BulkOperationType) -> AuditEventType {
    match kind {
        BulkOperationType::Create => AuditEventType::RecordsCreated,
        BulkOperationType::Update => AuditEventType::RecordsUpdated,
        BulkOperationType::Delete => AuditEventType::RecordsDeleted,
    }
}

/// Writes audit events, applying the configured [`AuditPolicy`].
pub(crate) struct AuditEmitter {
    sink: Arc<dyn AuditSink>,
    policy: AuditPolicy,
}

impl AuditEmitter {
    pub(crate) fn new(sink: Arc<dyn AuditSink>, policy: AuditPolicy) -> Self {
        Self { sink, policy }
    }

    fn apply_policy(
        &self,
        result: Result<(), bulk_operations_repository::AuditError>,
    ) -> Result<(), BulkError> {
        match result {
            Ok(()) => Ok(()),
            Err(e) => match self.policy {
                AuditPolicy::BestEffort => {
                    warn!(error = %e, "Failed to write audit event");
                    Ok(())
                }
                AuditPolicy::Required => Err(e.into()),
            },
        }
    }

    /// Record the start of an operation over `target_ids`.
    pub(crate) async fn started(
        &self,
        kind: BulkOperationType,
        caller_id: &str,
        target_ids: &[String],
        metadata: Map<String, Value>,
    ) -> Result<(), BulkError> {
        let result = self
            .sink
            .log_bulk_operation(
                caller_id,
                event_type(kind),
                &format!("BULK_{}", kind.as_str()),
                target_ids,
                metadata,
            )
            .await;
        self.apply_policy(result)
    }

    /// Record the outcome of a finished operation.
    pub(crate) async fn completed(
        &self,
        kind: BulkOperationType,
        caller_id: &str,
        result: &BulkOperationResult,
        extra: Map<String, Value>,
    ) -> Result<(), BulkError> {
        let severity = match kind {
            BulkOperationType::Update if result.error_count > 0 => AuditSeverity::High,
            BulkOperationType::Update => AuditSeverity::Medium,
            BulkOperationType::Delete => AuditSeverity::High,
            BulkOperationType::Create => AuditSeverity::Medium,
        };

        let mut metadata = extra;
        metadata.insert("operation_id".to_string(), json!(result.operation_id));
        metadata.insert("duration_ms".to_string(), json!(result.duration_ms));
        metadata.insert("processed_count".to_string(), json!(result.processed_count));
        metadata.insert("error_count".to_string(), json!(result.error_count));

        let event = AuditEvent::new(
            event_type(kind),
            severity,
            caller_id,
            format!("BULK_{}_COMPLETED", kind.as_str()),
            format!(
                "Bulk {}: {} succeeded, {} failed",
                kind.as_str().to_lowercase(),
                result.processed_count,
                result.error_count
            ),
        )
        .with_metadata(metadata);

        let written = self.sink.log(&event).await;
        self.apply_policy(written)
    }

    /// Record a failed or rejected operation.
    ///
    /// Never fails: the operation error is what the caller needs to see. A
    /// pre-delete backup carried by the error is stored in the metadata so the
    /// deleted documents can be restored from the audit trail.
    pub(crate) async fn failed(
        &self,
        kind: BulkOperationType,
        caller_id: &str,
        operation_id: &str,
        error: &BulkError,
    ) {
        let mut metadata = Map::new();
        metadata.insert("operation_id".to_string(), json!(operation_id));
        if let Some(backup) = error.backup() {
            let ids: Vec<&str> = backup.iter().map(|doc| doc.id.as_str()).collect();
            metadata.insert("backup_ids".to_string(), json!(ids));
            metadata.insert("backup".to_string(), json!(backup));
        }

        let event = AuditEvent::new(
            event_type(kind),
            AuditSeverity::Critical,
            caller_id,
            format!("BULK_{}_FAILED", kind.as_str()),
            format!("Bulk {} failed: {}", kind.as_str().to_lowercase(), error),
        )
        .with_metadata(metadata)
        .with_error(format!("BULK_{}_ERROR", kind.as_str()), error.to_string());

        if let Err(e) = self.sink.log(&event).await {
            warn!(operation_id, error = %e, "Failed to write audit failure event");
        }
    }

    /// Record the cancellation of an operation.
    pub(crate) async fn cancelled(
        &self,
        caller_id: &str,
        operation_id: &str,
    ) -> Result<(), BulkError> {
        let mut metadata = Map::new();
        metadata.insert("operation_id".to_string(), json!(operation_id));
        metadata.insert("cancelled_at".to_string(), json!(Utc::now().to_rfc3339()));

        let event = AuditEvent::new(
            AuditEventType::BulkOperationCancelled,
            AuditSeverity::Medium,
            caller_id,
            "BULK_OPERATION_CANCELLED",
            format!("Bulk operation cancelled: {}", operation_id),
        )
        .with_metadata(metadata);

        let written = self.sink.log(&event).await;
        self.apply_policy(written)
    }
}
