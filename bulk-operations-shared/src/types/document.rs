//! Document payload types.
//!
//! Records are schemaless JSON objects. The orchestrator never looks inside a
//! document except through caller-supplied validators and `BulkFilter`s.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A schemaless record stored in a collection.
pub type Document = Map<String, Value>;

/// A partial update targeting one document by id.
///
/// Only the keys present in `data` are written; other fields of the stored
/// document are left untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentUpdate {
    /// Identifier of the document to update.
    pub document_id: String,
    /// Fields to merge into the stored document.
    pub data: Document,
}

impl DocumentUpdate {
    /// Create a new partial update.
    pub fn new(document_id: impl Into<String>, data: Document) -> Self {
        Self {
            document_id: document_id.into(),
            data,
        }
    }
}

/// A document as read back from the store, with its identifier.
///
/// Used for pre-delete backups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub data: Document,
}
