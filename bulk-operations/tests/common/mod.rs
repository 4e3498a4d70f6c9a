//! Shared mocks for the bulk operation integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bulk_operations::{BulkConfig, BulkOperationService, ProgressCallback, UnboundedQueue};
use bulk_operations_repository::{
    DocumentStore, InMemoryDocumentStore, MemoryAuditSink, StoreError,
};
use bulk_operations_shared::{
    BulkFilter, BulkOperationProgress, Document, DocumentUpdate, OperationStatus, StoredDocument,
};
use serde_json::{json, Value};

pub const COLLECTION: &str = "attendance";

pub fn doc(value: Value) -> Document {
    value.as_object().cloned().unwrap()
}

/// Document store that counts calls and fails chosen write calls.
///
/// Write calls are numbered from 1 across update, delete and create.
pub struct MockDocumentStore {
    pub inner: InMemoryDocumentStore,
    write_calls: AtomicUsize,
    update_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    create_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    find_calls: AtomicUsize,
    failing_calls: Mutex<HashSet<usize>>,
}

impl MockDocumentStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryDocumentStore::new(),
            write_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            find_calls: AtomicUsize::new(0),
            failing_calls: Mutex::new(HashSet::new()),
        }
    }

    /// Store with `count` documents `doc-0..doc-<count>` in [`COLLECTION`].
    pub fn seeded(count: usize) -> Self {
        let store = Self::new();
        for i in 0..count {
            store.inner.insert(
                COLLECTION,
                format!("doc-{}", i),
                doc(json!({ "name": format!("member {}", i), "present": false })),
            );
        }
        store
    }

    /// Fail the given write calls (1-based).
    pub fn fail_calls(&self, calls: impl IntoIterator<Item = usize>) {
        self.failing_calls.lock().unwrap().extend(calls);
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst) + self.fetch_calls() + self.find_calls()
    }

    fn next_write(&self) -> Result<(), StoreError> {
        let call = self.write_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_calls.lock().unwrap().contains(&call) {
            return Err(StoreError::unavailable(format!("injected failure on call {}", call)));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl DocumentStore for MockDocumentStore {
    async fn batch_update(
        &self,
        collection: &str,
        updates: &[DocumentUpdate],
    ) -> Result<(), StoreError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.next_write()?;
        self.inner.batch_update(collection, updates).await
    }

    async fn batch_delete(&self, collection: &str, ids: &[String]) -> Result<(), StoreError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.next_write()?;
        self.inner.batch_delete(collection, ids).await
    }

    async fn create_documents(
        &self,
        collection: &str,
        documents: &[Document],
    ) -> Result<Vec<String>, StoreError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.next_write()?;
        self.inner.create_documents(collection, documents).await
    }

    async fn fetch_by_ids(
        &self,
        collection: &str,
        ids: &[String],
    ) -> Result<Vec<StoredDocument>, StoreError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch_by_ids(collection, ids).await
    }

    async fn find_ids(&self, collection: &str, filter: &BulkFilter) -> Result<Vec<String>, StoreError> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.find_ids(collection, filter).await
    }
}

/// Service wired to a mock store, an unbounded queue and a memory audit sink.
pub struct Harness {
    pub service: Arc<BulkOperationService>,
    pub store: Arc<MockDocumentStore>,
    pub audit: Arc<MemoryAuditSink>,
}

impl Harness {
    pub fn new(store: MockDocumentStore, config: BulkConfig) -> Self {
        let store = Arc::new(store);
        let audit = Arc::new(MemoryAuditSink::new());
        let service = BulkOperationService::with_config(
            store.clone(),
            Arc::new(UnboundedQueue::new()),
            audit.clone(),
            config,
        );
        Self {
            service: Arc::new(service),
            store,
            audit,
        }
    }
}

/// Progress callback recording every snapshot it sees.
pub fn recording_callback() -> (ProgressCallback, Arc<Mutex<Vec<BulkOperationProgress>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback: ProgressCallback = Arc::new(move |progress: &BulkOperationProgress| {
        sink.lock().unwrap().push(progress.clone());
    });
    (callback, seen)
}

/// Assert the recorded snapshots only move forward and end terminal.
pub fn assert_monotonic(snapshots: &[BulkOperationProgress]) {
    assert!(!snapshots.is_empty());
    for pair in snapshots.windows(2) {
        assert!(pair[1].processed >= pair[0].processed);
        assert!(pair[1].errors >= pair[0].errors);
    }
    let last = snapshots.last().unwrap().status;
    assert!(matches!(
        last,
        OperationStatus::Completed | OperationStatus::Failed
    ));
}
