//! Final report of a bulk operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::document::StoredDocument;

/// Outcome of a single item within a bulk operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub document_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ItemOutcome {
    pub fn succeeded(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            success: true,
            error: None,
        }
    }

    pub fn failed(document_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Immutable summary produced once every batch of an operation was attempted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkOperationResult {
    pub operation_id: String,
    /// `true` when no item failed.
    pub success: bool,
    /// Number of items written successfully.
    pub processed_count: usize,
    /// Number of items that failed.
    pub error_count: usize,
    /// Per-item outcomes, in submission order.
    pub results: Vec<ItemOutcome>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    /// Documents fetched before a delete, when a backup was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<Vec<StoredDocument>>,
}

impl BulkOperationResult {
    /// Aggregate item outcomes into a result. Counts are derived from the outcomes.
    pub fn from_outcomes(
        operation_id: impl Into<String>,
        results: Vec<ItemOutcome>,
        duration_ms: u64,
    ) -> Self {
        let processed_count = results.iter().filter(|r| r.success).count();
        let error_count = results.len() - processed_count;

        Self {
            operation_id: operation_id.into(),
            success: error_count == 0,
            processed_count,
            error_count,
            results,
            duration_ms,
            timestamp: Utc::now(),
            backup: None,
        }
    }

    /// Attach a pre-delete backup.
    pub fn with_backup(mut self, backup: Vec<StoredDocument>) -> Self {
        self.backup = Some(backup);
        self
    }

    /// Ids of the items that failed, for callers that want to resubmit them.
    pub fn failed_ids(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.document_id.as_str())
            .collect()
    }
}
