//! Document store interface.
//!
//! Defines the operations the orchestrator needs from the backing store. Every
//! implementation must be safe to share across tasks.

use async_trait::async_trait;
use bulk_operations_shared::{BulkFilter, Document, DocumentUpdate, StoredDocument};

use crate::errors::StoreError;

/// Maximum number of ids accepted by a single [`DocumentStore::fetch_by_ids`] call.
pub const MAX_IDS_PER_LOOKUP: usize = 30;

/// Persistence for schemaless documents grouped in collections.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Merge partial updates into existing documents.
    ///
    /// The whole batch is applied atomically: if any document is missing or
    /// any write fails, nothing is written. Each updated document gets a
    /// fresh `updated_at` timestamp.
    ///
    /// # Arguments
    ///
    /// * `collection` - Collection holding the documents
    /// * `updates` - Partial updates, one per document
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Every update was applied
    /// * `Err(StoreError)` - Nothing was applied
    async fn batch_update(
        &self,
        collection: &str,
        updates: &[DocumentUpdate],
    ) -> Result<(), StoreError>;

    /// Delete documents by id, atomically.
    ///
    /// Ids that do not exist are ignored.
    async fn batch_delete(&self, collection: &str, ids: &[String]) -> Result<(), StoreError>;

    /// Insert new documents and return their store-assigned ids, in input order.
    ///
    /// Each document is stamped with `created_at` and `updated_at`. Inserts are
    /// not atomic across documents: an error means some documents may already
    /// exist.
    async fn create_documents(
        &self,
        collection: &str,
        documents: &[Document],
    ) -> Result<Vec<String>, StoreError>;

    /// Fetch documents by id. Missing ids are skipped.
    ///
    /// Implementations reject more than [`MAX_IDS_PER_LOOKUP`] ids with
    /// [`StoreError::LookupLimitExceeded`].
    async fn fetch_by_ids(
        &self,
        collection: &str,
        ids: &[String],
    ) -> Result<Vec<StoredDocument>, StoreError>;

    /// Ids of every document in `collection` matching `filter`.
    async fn find_ids(&self, collection: &str, filter: &BulkFilter)
        -> Result<Vec<String>, StoreError>;
}
