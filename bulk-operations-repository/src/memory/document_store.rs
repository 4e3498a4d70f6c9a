//! In-memory document store.
//!
//! Holds every collection in a process-local map. Batches are validated before
//! anything is written, so updates and deletes are atomic like the PostgreSQL
//! implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use bulk_operations_shared::{BulkFilter, Document, DocumentUpdate, StoredDocument};
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::errors::StoreError;
use crate::interfaces::{DocumentStore, MAX_IDS_PER_LOOKUP};

type Collection = BTreeMap<String, Document>;

/// Document store kept entirely in memory.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryDocumentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document under a known id.
    pub fn insert(&self, collection: &str, id: impl Into<String>, document: Document) {
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.into(), document);
    }

    /// Read a single document.
    pub fn get(&self, collection: &str, id: &str) -> Option<Document> {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        collections.get(collection)?.get(id).cloned()
    }

    /// Number of documents in a collection.
    pub fn len(&self, collection: &str) -> usize {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        collections.get(collection).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

fn timestamp() -> Value {
    Value::String(Utc::now().to_rfc3339())
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn batch_update(
        &self,
        collection: &str,
        updates: &[DocumentUpdate],
    ) -> Result<(), StoreError> {
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        let documents = collections.entry(collection.to_string()).or_default();

        if let Some(missing) = updates
            .iter()
            .find(|u| !documents.contains_key(&u.document_id))
        {
            return Err(StoreError::not_found(format!(
                "{}/{}",
                collection, missing.document_id
            )));
        }

        let now = timestamp();
        for update in updates {
            if let Some(document) = documents.get_mut(&update.document_id) {
                for (key, value) in &update.data {
                    document.insert(key.clone(), value.clone());
                }
                document.insert("updated_at".to_string(), now.clone());
            }
        }
        Ok(())
    }

    async fn batch_delete(&self, collection: &str, ids: &[String]) -> Result<(), StoreError> {
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(documents) = collections.get_mut(collection) {
            for id in ids {
                documents.remove(id);
            }
        }
        Ok(())
    }

    async fn create_documents(
        &self,
        collection: &str,
        documents: &[Document],
    ) -> Result<Vec<String>, StoreError> {
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        let stored = collections.entry(collection.to_string()).or_default();

        let now = timestamp();
        let ids = documents
            .iter()
            .map(|document| {
                let id = Uuid::new_v4().simple().to_string();
                let mut document = document.clone();
                document.insert("created_at".to_string(), now.clone());
                document.insert("updated_at".to_string(), now.clone());
                stored.insert(id.clone(), document);
                id
            })
            .collect();
        Ok(ids)
    }

    async fn fetch_by_ids(
        &self,
        collection: &str,
        ids: &[String],
    ) -> Result<Vec<StoredDocument>, StoreError> {
        if ids.len() > MAX_IDS_PER_LOOKUP {
            return Err(StoreError::LookupLimitExceeded {
                provided: ids.len(),
                max: MAX_IDS_PER_LOOKUP,
            });
        }

        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        let Some(documents) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| {
                documents.get(id).map(|data| StoredDocument {
                    id: id.clone(),
                    data: data.clone(),
                })
            })
            .collect())
    }

    async fn find_ids(
        &self,
        collection: &str,
        filter: &BulkFilter,
    ) -> Result<Vec<String>, StoreError> {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        Ok(collections
            .get(collection)
            .map(|documents| {
                documents
                    .iter()
                    .filter(|(_, document)| filter.matches(document))
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulk_operations_shared::FilterOperator;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_batch_update_merges_and_stamps() {
        let store = InMemoryDocumentStore::new();
        store.insert("members", "a", doc(json!({ "name": "Ana", "active": true })));

        store
            .batch_update(
                "members",
                &[DocumentUpdate::new("a", doc(json!({ "active": false })))],
            )
            .await
            .unwrap();

        let stored = store.get("members", "a").unwrap();
        assert_eq!(stored["name"], json!("Ana"));
        assert_eq!(stored["active"], json!(false));
        assert!(stored.contains_key("updated_at"));
    }

    #[tokio::test]
    async fn test_batch_update_is_atomic() {
        let store = InMemoryDocumentStore::new();
        store.insert("members", "a", doc(json!({ "v": 1 })));

        let err = store
            .batch_update(
                "members",
                &[
                    DocumentUpdate::new("a", doc(json!({ "v": 2 }))),
                    DocumentUpdate::new("missing", doc(json!({ "v": 2 }))),
                ],
            )
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::NotFound(_)));
        assert_eq!(store.get("members", "a").unwrap()["v"], json!(1));
    }

    #[tokio::test]
    async fn test_create_returns_ids_in_order() {
        let store = InMemoryDocumentStore::new();
        let ids = store
            .create_documents("members", &[doc(json!({ "n": 1 })), doc(json!({ "n": 2 }))])
            .await
            .unwrap();

        assert_eq!(ids.len(), 2);
        assert_eq!(store.get("members", &ids[0]).unwrap()["n"], json!(1));
        assert_eq!(store.get("members", &ids[1]).unwrap()["n"], json!(2));
        assert!(store.get("members", &ids[1]).unwrap().contains_key("created_at"));
    }

    #[tokio::test]
    async fn test_fetch_by_ids_limit() {
        let store = InMemoryDocumentStore::new();
        let ids: Vec<String> = (0..=MAX_IDS_PER_LOOKUP).map(|i| i.to_string()).collect();

        let err = store.fetch_by_ids("members", &ids).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::LookupLimitExceeded {
                provided: MAX_IDS_PER_LOOKUP + 1,
                max: MAX_IDS_PER_LOOKUP
            }
        );
    }

    #[tokio::test]
    async fn test_delete_and_find() {
        let store = InMemoryDocumentStore::new();
        store.insert("attendance", "1", doc(json!({ "service": "sunday" })));
        store.insert("attendance", "2", doc(json!({ "service": "wednesday" })));
        store.insert("attendance", "3", doc(json!({ "service": "sunday" })));

        let filter = BulkFilter::new("service", FilterOperator::Eq, json!("sunday"));
        let ids = store.find_ids("attendance", &filter).await.unwrap();
        assert_eq!(ids, vec!["1".to_string(), "3".to_string()]);

        store.batch_delete("attendance", &ids).await.unwrap();
        assert_eq!(store.len("attendance"), 1);
        assert!(store.get("attendance", "2").is_some());
    }
}
