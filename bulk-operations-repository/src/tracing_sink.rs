//! Audit sink writing structured `tracing` events.

use async_trait::async_trait;
use bulk_operations_shared::{AuditEvent, AuditSeverity};
use tracing::{error, info, warn};

use crate::errors::AuditError;
use crate::interfaces::AuditSink;

/// Emits every audit event as a structured log record.
///
/// `LOW` and `MEDIUM` events are logged at info level, `HIGH` at warn and
/// `CRITICAL` at error. Never fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl TracingAuditSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn log(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let metadata = serde_json::to_string(&event.metadata)?;
        let error_code = event.error.as_ref().map(|e| e.code.as_str());
        let error_message = event.error.as_ref().map(|e| e.message.as_str());

        match event.severity {
            AuditSeverity::Low | AuditSeverity::Medium => info!(
                target: "audit",
                event_type = %event.event_type,
                severity = %event.severity,
                caller_id = %event.caller_id,
                action = %event.action,
                metadata = %metadata,
                "{}",
                event.description
            ),
            AuditSeverity::High => warn!(
                target: "audit",
                event_type = %event.event_type,
                severity = %event.severity,
                caller_id = %event.caller_id,
                action = %event.action,
                metadata = %metadata,
                "{}",
                event.description
            ),
            AuditSeverity::Critical => error!(
                target: "audit",
                event_type = %event.event_type,
                severity = %event.severity,
                caller_id = %event.caller_id,
                action = %event.action,
                error_code = ?error_code,
                error_message = ?error_message,
                metadata = %metadata,
                "{}",
                event.description
            ),
        }
        Ok(())
    }
}
