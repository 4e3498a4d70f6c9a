//! Progress snapshots of in-flight bulk operations.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle status of a bulk operation.
///
/// Status only moves forward: `Pending → Running → {Completed | Failed | Cancelled}`.
/// An operation rejected before it starts goes straight from `Pending` to
/// `Failed` (or `Cancelled`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "PENDING",
            OperationStatus::Running => "RUNNING",
            OperationStatus::Completed => "COMPLETED",
            OperationStatus::Failed => "FAILED",
            OperationStatus::Cancelled => "CANCELLED",
        }
    }

    /// Whether the status can never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Cancelled
        )
    }

    /// Whether moving from `self` to `next` is a forward transition.
    pub fn can_transition_to(&self, next: OperationStatus) -> bool {
        use OperationStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A rejected status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid status transition from {from} to {to}")]
pub struct StatusTransitionError {
    pub from: OperationStatus,
    pub to: OperationStatus,
}

/// Counters and status of one operation.
///
/// Owned by the orchestrator for the lifetime of the operation and never
/// persisted. `processed + errors <= total` holds at all times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkOperationProgress {
    pub operation_id: String,
    pub total: usize,
    pub processed: usize,
    pub errors: usize,
    pub status: OperationStatus,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_completion: Option<DateTime<Utc>>,
}

impl BulkOperationProgress {
    /// A fresh `Pending` snapshot with zeroed counters.
    pub fn new(operation_id: impl Into<String>, total: usize) -> Self {
        Self {
            operation_id: operation_id.into(),
            total,
            processed: 0,
            errors: 0,
            status: OperationStatus::Pending,
            start_time: Utc::now(),
            estimated_completion: None,
        }
    }

    /// Move to `next`, rejecting backward or terminal transitions.
    pub fn advance_to(&mut self, next: OperationStatus) -> Result<(), StatusTransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(StatusTransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Count `count` more items as processed, clamped to the remaining items.
    pub fn record_processed(&mut self, count: usize) {
        self.processed += count.min(self.remaining());
    }

    /// Count `count` more items as failed, clamped to the remaining items.
    pub fn record_errors(&mut self, count: usize) {
        self.errors += count.min(self.remaining());
    }

    /// Items neither processed nor failed yet.
    pub fn remaining(&self) -> usize {
        self.total - self.processed - self.errors
    }

    /// Whether every item has been attempted.
    pub fn is_settled(&self) -> bool {
        self.remaining() == 0
    }
}
