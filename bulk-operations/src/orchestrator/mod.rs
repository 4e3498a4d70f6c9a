//! Bulk operation orchestrator.
//!
//! Validates requests, splits them into batches, runs every batch through the
//! queue strictly in order, tracks progress and aggregates per-item outcomes
//! into a [`BulkOperationResult`].

mod audit;
mod config;
mod options;
mod submit;

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use bulk_operations_repository::{AuditSink, DocumentStore, StoreError, MAX_IDS_PER_LOOKUP};
use bulk_operations_shared::{
    BulkOperationProgress, BulkOperationResult, BulkOperationType, Document, DocumentUpdate,
    ItemOutcome, OperationStatus, StoredDocument,
};
use chrono::Utc;
use futures::FutureExt;
use serde_json::{json, Map, Value};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::batching::{batch_size_from, create_batches};
use crate::errors::{BulkError, QueueError};
use crate::queue::{OperationQueue, QueueOptions};
use crate::tracker::{estimate_completion, OperationHandle, ProgressCallback, ProgressTracker};

use audit::AuditEmitter;

pub use config::{AuditPolicy, BulkConfig, BulkLimits};
pub use options::{CreateOptions, DeleteOptions, OperationOptions, UpdateOptions, Validator};

/// Queue priority of update batches.
const UPDATE_PRIORITY: u8 = 3;
/// Queue priority of delete batches.
const DELETE_PRIORITY: u8 = 2;
/// Queue priority of create batches.
const CREATE_PRIORITY: u8 = 4;

/// Generate a fresh operation id: `bulk_<unix millis>_<9 random chars>`.
pub fn generate_operation_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("bulk_{}_{}", Utc::now().timestamp_millis(), &suffix[..9])
}

fn queue_key(kind: BulkOperationType, caller_id: &str) -> String {
    format!("bulk-{}-{}", kind.as_str().to_lowercase(), caller_id)
}

fn priority(kind: BulkOperationType) -> u8 {
    match kind {
        BulkOperationType::Update => UPDATE_PRIORITY,
        BulkOperationType::Delete => DELETE_PRIORITY,
        BulkOperationType::Create => CREATE_PRIORITY,
    }
}

/// Error message recorded on every item of a failed batch.
fn batch_error_message(err: &BulkError) -> String {
    match err {
        BulkError::BatchExecution(msg) => msg.clone(),
        BulkError::Queue(QueueError::Work(e)) | BulkError::Store(e) => e.to_string(),
        other => other.to_string(),
    }
}

fn check_not_empty(len: usize, what: &str) -> Result<(), BulkError> {
    if len == 0 {
        return Err(BulkError::invalid_argument(format!(
            "{} list must not be empty",
            what
        )));
    }
    Ok(())
}

fn check_limit(len: usize, max: usize) -> Result<(), BulkError> {
    if len > max {
        return Err(BulkError::LimitExceeded { provided: len, max });
    }
    Ok(())
}

/// Orchestrates bulk create, update and delete operations.
///
/// Collaborators are injected explicitly. The service is `Send + Sync` and
/// meant to be shared behind an `Arc`.
pub struct BulkOperationService {
    store: Arc<dyn DocumentStore>,
    queue: Arc<dyn OperationQueue>,
    audit: AuditEmitter,
    tracker: ProgressTracker,
    config: BulkConfig,
}

impl BulkOperationService {
    /// Create a new service with default configuration.
    ///
    /// # Arguments
    ///
    /// * `store` - Backing document store
    /// * `queue` - Queue every batch is submitted through
    /// * `audit` - Destination of audit events
    pub fn new(
        store: Arc<dyn DocumentStore>,
        queue: Arc<dyn OperationQueue>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self::with_config(store, queue, audit, BulkConfig::default())
    }

    /// Create a new service with custom configuration.
    pub fn with_config(
        store: Arc<dyn DocumentStore>,
        queue: Arc<dyn OperationQueue>,
        audit: Arc<dyn AuditSink>,
        config: BulkConfig,
    ) -> Self {
        Self {
            store,
            queue,
            audit: AuditEmitter::new(audit, config.audit_policy),
            tracker: ProgressTracker::new(),
            config,
        }
    }

    pub fn config(&self) -> &BulkConfig {
        &self.config
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    /// Latest progress of an active operation.
    pub fn get_operation_progress(&self, operation_id: &str) -> Option<BulkOperationProgress> {
        self.tracker.get_operation_progress(operation_id)
    }

    /// Progress of every active operation.
    pub fn get_active_operations(&self) -> Vec<BulkOperationProgress> {
        self.tracker.get_active_operations()
    }

    /// Cancel an active operation.
    ///
    /// Writes the cancellation audit event, then marks the operation
    /// `Cancelled`, notifies its callback and stops tracking it. When the
    /// audit event is required and cannot be written, the operation keeps
    /// running and stays tracked.
    /// Batches already dispatched or still pending keep running; the
    /// operation just stops reporting progress.
    #[instrument(skip(self))]
    pub async fn cancel_operation(
        &self,
        operation_id: &str,
        caller_id: &str,
    ) -> Result<BulkOperationProgress, BulkError> {
        self.tracker.ensure_cancellable(operation_id)?;
        self.audit.cancelled(caller_id, operation_id).await?;

        let (snapshot, callback) = self.tracker.cancel(operation_id)?;
        if let Some(callback) = callback {
            callback(&snapshot);
        }
        info!(operation_id, caller_id, "Bulk operation cancelled");
        Ok(snapshot)
    }

    /// Update many documents.
    ///
    /// Each update is validated as part of its batch: one invalid update fails
    /// the whole batch. With `dry_run`, nothing is written.
    ///
    /// # Returns
    ///
    /// * `Ok(BulkOperationResult)` - Every batch was attempted
    /// * `Err(BulkError)` - The request was rejected or the operation aborted
    #[instrument(skip(self, updates, options), fields(count = updates.len(), caller_id = %options.caller_id))]
    pub async fn bulk_update(
        &self,
        collection: &str,
        updates: Vec<DocumentUpdate>,
        options: UpdateOptions,
    ) -> Result<BulkOperationResult, BulkError> {
        let kind = BulkOperationType::Update;
        let operation_id = generate_operation_id();

        let checked = check_not_empty(updates.len(), "update")
            .and_then(|_| check_limit(updates.len(), self.config.limits.max_update_items));
        if let Err(err) = checked {
            return Err(self.reject(kind, &options.caller_id, &operation_id, err).await);
        }

        let mut handle = self.open(&operation_id, updates.len(), options.on_progress.clone());
        let result = self
            .run_update(&mut handle, collection, updates, &options)
            .await;
        self.settle(&mut handle, kind, &options.caller_id, result)
            .await
    }

    async fn run_update(
        &self,
        handle: &mut OperationHandle<'_>,
        collection: &str,
        updates: Vec<DocumentUpdate>,
        options: &UpdateOptions,
    ) -> Result<BulkOperationResult, BulkError> {
        let kind = BulkOperationType::Update;
        let started = Instant::now();
        let operation_id = handle.progress().operation_id.clone();

        let target_ids: Vec<String> = updates.iter().map(|u| u.document_id.clone()).collect();
        let mut metadata = Map::new();
        metadata.insert("collection".to_string(), json!(collection));
        metadata.insert("dry_run".to_string(), json!(options.dry_run));
        metadata.insert("operation_id".to_string(), json!(operation_id));
        self.audit
            .started(kind, &options.caller_id, &target_ids, metadata)
            .await?;

        handle.transition(OperationStatus::Running)?;
        info!(operation_id = %operation_id, total = updates.len(), dry_run = options.dry_run, "Bulk update started");

        let key = queue_key(kind, &options.caller_id);
        let key = key.as_str();
        let batches = create_batches(updates, batch_size_from(self.config.max_batch_size)?);
        let validator = options.validator.as_ref();
        let dry_run = options.dry_run;

        let outcomes = self
            .run_batches(
                handle,
                batches,
                |_, _, update: &DocumentUpdate| update.document_id.clone(),
                move |_, batch| self.update_batch(collection, key, batch, validator, dry_run),
            )
            .await?;

        let mut extra = Map::new();
        extra.insert("dry_run".to_string(), json!(options.dry_run));
        self.complete(handle, kind, &options.caller_id, outcomes, started, extra)
            .await
    }

    async fn update_batch(
        &self,
        collection: &str,
        key: &str,
        batch: Vec<DocumentUpdate>,
        validator: Option<&Validator>,
        dry_run: bool,
    ) -> Result<Vec<String>, BulkError> {
        if let Some(validator) = validator {
            if let Some(invalid) = batch.iter().find(|u| !validator(&u.data)) {
                return Err(BulkError::batch_execution(format!(
                    "invalid data for document {}",
                    invalid.document_id
                )));
            }
        }

        let ids: Vec<String> = batch.iter().map(|u| u.document_id.clone()).collect();
        let work = if dry_run {
            let latency = self.config.dry_run_latency;
            async move {
                sleep(latency).await;
                Ok::<(), StoreError>(())
            }
            .boxed()
        } else {
            let store = &self.store;
            async move { store.batch_update(collection, &batch).await }.boxed()
        };

        self.queue
            .queue_operation(key, work, self.queue_options(BulkOperationType::Update))
            .await?;
        Ok(ids)
    }

    /// Delete many documents by id.
    ///
    /// Deletes above the confirmation threshold require a confirmation token.
    /// With `create_backup`, the documents are fetched first and returned in
    /// [`BulkOperationResult::backup`].
    #[instrument(skip(self, document_ids, options), fields(count = document_ids.len(), caller_id = %options.caller_id))]
    pub async fn bulk_delete(
        &self,
        collection: &str,
        document_ids: Vec<String>,
        options: DeleteOptions,
    ) -> Result<BulkOperationResult, BulkError> {
        let kind = BulkOperationType::Delete;
        let operation_id = generate_operation_id();
        let limits = &self.config.limits;

        let checked = check_not_empty(document_ids.len(), "document id")
            .and_then(|_| check_limit(document_ids.len(), limits.max_delete_items))
            .and_then(|_| {
                if document_ids.len() > limits.delete_confirmation_threshold
                    && !options.is_confirmed()
                {
                    return Err(BulkError::ConfirmationRequired {
                        count: document_ids.len(),
                        threshold: limits.delete_confirmation_threshold,
                    });
                }
                Ok(())
            });
        if let Err(err) = checked {
            return Err(self.reject(kind, &options.caller_id, &operation_id, err).await);
        }

        let mut handle = self.open(&operation_id, document_ids.len(), options.on_progress.clone());
        let result = self
            .run_delete(&mut handle, collection, document_ids, &options)
            .await;
        self.settle(&mut handle, kind, &options.caller_id, result)
            .await
    }

    async fn run_delete(
        &self,
        handle: &mut OperationHandle<'_>,
        collection: &str,
        document_ids: Vec<String>,
        options: &DeleteOptions,
    ) -> Result<BulkOperationResult, BulkError> {
        let kind = BulkOperationType::Delete;
        let started = Instant::now();
        let operation_id = handle.progress().operation_id.clone();

        let mut metadata = Map::new();
        metadata.insert("collection".to_string(), json!(collection));
        metadata.insert("operation_id".to_string(), json!(operation_id));
        metadata.insert("has_backup".to_string(), json!(options.create_backup));
        metadata.insert(
            "confirmation_token".to_string(),
            json!(options.is_confirmed()),
        );
        self.audit
            .started(kind, &options.caller_id, &document_ids, metadata)
            .await?;

        handle.transition(OperationStatus::Running)?;
        info!(operation_id = %operation_id, total = document_ids.len(), backup = options.create_backup, "Bulk delete started");

        let backup = if options.create_backup {
            Some(self.backup_documents(collection, &document_ids).await?)
        } else {
            None
        };

        match self
            .delete_batches(handle, collection, document_ids, options, backup.is_some(), started)
            .await
        {
            Ok(result) => Ok(match backup {
                Some(backup) => result.with_backup(backup),
                None => result,
            }),
            Err(err) => Err(match backup {
                Some(backup) => {
                    warn!(operation_id = %operation_id, documents = backup.len(), "Delete aborted, backup returned with the error");
                    err.with_backup(backup)
                }
                None => err,
            }),
        }
    }

    async fn delete_batches(
        &self,
        handle: &mut OperationHandle<'_>,
        collection: &str,
        document_ids: Vec<String>,
        options: &DeleteOptions,
        backup_created: bool,
        started: Instant,
    ) -> Result<BulkOperationResult, BulkError> {
        let kind = BulkOperationType::Delete;
        let key = queue_key(kind, &options.caller_id);
        let key = key.as_str();
        let batches = create_batches(document_ids, batch_size_from(self.config.max_batch_size)?);

        let outcomes = self
            .run_batches(
                handle,
                batches,
                |_, _, id: &String| id.clone(),
                move |_, batch| self.delete_batch(collection, key, batch),
            )
            .await?;

        let mut extra = Map::new();
        extra.insert("backup_created".to_string(), json!(backup_created));
        self.complete(handle, kind, &options.caller_id, outcomes, started, extra)
            .await
    }

    /// Fetch the documents about to be deleted, a few ids per lookup.
    async fn backup_documents(
        &self,
        collection: &str,
        document_ids: &[String],
    ) -> Result<Vec<StoredDocument>, BulkError> {
        let chunk = self
            .config
            .backup_lookup_chunk
            .clamp(1, MAX_IDS_PER_LOOKUP);

        let mut backup = Vec::with_capacity(document_ids.len());
        for ids in document_ids.chunks(chunk) {
            backup.extend(self.store.fetch_by_ids(collection, ids).await?);
        }
        debug!(collection, documents = backup.len(), "Backup created");
        Ok(backup)
    }

    async fn delete_batch(
        &self,
        collection: &str,
        key: &str,
        batch: Vec<String>,
    ) -> Result<Vec<String>, BulkError> {
        let store = &self.store;
        let work = async { store.batch_delete(collection, &batch).await }.boxed();
        self.queue
            .queue_operation(key, work, self.queue_options(BulkOperationType::Delete))
            .await?;
        Ok(batch)
    }

    /// Insert many new documents.
    ///
    /// The validator, when given, runs on every document before anything is
    /// written and rejects the whole request if any document is invalid.
    #[instrument(skip(self, documents, options), fields(count = documents.len(), caller_id = %options.caller_id))]
    pub async fn bulk_create(
        &self,
        collection: &str,
        documents: Vec<Document>,
        options: CreateOptions,
    ) -> Result<BulkOperationResult, BulkError> {
        let kind = BulkOperationType::Create;
        let operation_id = generate_operation_id();

        let checked = check_not_empty(documents.len(), "document")
            .and_then(|_| check_limit(documents.len(), self.config.limits.max_create_items))
            .and_then(|_| {
                let Some(validator) = &options.validator else {
                    return Ok(());
                };
                let invalid = documents.iter().filter(|d| !validator(*d)).count();
                if invalid > 0 {
                    return Err(BulkError::ValidationFailed {
                        invalid,
                        total: documents.len(),
                    });
                }
                Ok(())
            });
        if let Err(err) = checked {
            return Err(self.reject(kind, &options.caller_id, &operation_id, err).await);
        }

        let submitted = documents.len();
        let documents = if options.skip_duplicates {
            dedupe_documents(documents)
        } else {
            documents
        };
        let skipped = submitted - documents.len();

        let mut handle = self.open(&operation_id, documents.len(), options.on_progress.clone());
        let result = self
            .run_create(&mut handle, collection, documents, skipped, &options)
            .await;
        self.settle(&mut handle, kind, &options.caller_id, result)
            .await
    }

    async fn run_create(
        &self,
        handle: &mut OperationHandle<'_>,
        collection: &str,
        documents: Vec<Document>,
        skipped: usize,
        options: &CreateOptions,
    ) -> Result<BulkOperationResult, BulkError> {
        let kind = BulkOperationType::Create;
        let started = Instant::now();
        let operation_id = handle.progress().operation_id.clone();

        let mut metadata = Map::new();
        metadata.insert("collection".to_string(), json!(collection));
        metadata.insert("operation_id".to_string(), json!(operation_id));
        metadata.insert("document_count".to_string(), json!(documents.len()));
        metadata.insert(
            "skip_duplicates".to_string(),
            json!(options.skip_duplicates),
        );
        metadata.insert("duplicates_skipped".to_string(), json!(skipped));
        self.audit
            .started(kind, &options.caller_id, &[], metadata)
            .await?;

        handle.transition(OperationStatus::Running)?;
        info!(operation_id = %operation_id, total = documents.len(), skipped, "Bulk create started");

        let key = queue_key(kind, &options.caller_id);
        let key = key.as_str();
        let batches = create_batches(documents, batch_size_from(self.config.max_batch_size)?);

        let outcomes = self
            .run_batches(
                handle,
                batches,
                |batch, position, _: &Document| format!("batch-{}-doc-{}", batch, position),
                move |_, batch| self.create_batch(collection, key, batch),
            )
            .await?;

        self.complete(handle, kind, &options.caller_id, outcomes, started, Map::new())
            .await
    }

    async fn create_batch(
        &self,
        collection: &str,
        key: &str,
        batch: Vec<Document>,
    ) -> Result<Vec<String>, BulkError> {
        let store = &self.store;
        let mut ids = Vec::new();
        let work = async {
            ids = store.create_documents(collection, &batch).await?;
            Ok::<(), StoreError>(())
        }
        .boxed();
        self.queue
            .queue_operation(key, work, self.queue_options(BulkOperationType::Create))
            .await?;
        Ok(ids)
    }

    fn queue_options(&self, kind: BulkOperationType) -> QueueOptions {
        QueueOptions::new(priority(kind), self.config.timeout_per_batch)
    }

    /// Create the local progress of a new operation.
    fn open(
        &self,
        operation_id: &str,
        total: usize,
        callback: Option<ProgressCallback>,
    ) -> OperationHandle<'_> {
        let tracker = self
            .config
            .enable_progress_tracking
            .then_some(&self.tracker);
        OperationHandle::new(
            tracker,
            BulkOperationProgress::new(operation_id, total),
            callback,
        )
    }

    /// Log and audit a request rejected before it started.
    async fn reject(
        &self,
        kind: BulkOperationType,
        caller_id: &str,
        operation_id: &str,
        err: BulkError,
    ) -> BulkError {
        warn!(operation_id, kind = %kind, caller_id, error = %err, "Bulk operation rejected");
        self.audit.failed(kind, caller_id, operation_id, &err).await;
        err
    }

    /// Turn the outcome of a started operation into the caller's result.
    async fn settle(
        &self,
        handle: &mut OperationHandle<'_>,
        kind: BulkOperationType,
        caller_id: &str,
        result: Result<BulkOperationResult, BulkError>,
    ) -> Result<BulkOperationResult, BulkError> {
        match result {
            Ok(result) => Ok(result),
            Err(err) => {
                handle.mark_failed();
                let operation_id = handle.progress().operation_id.clone();
                error!(operation_id = %operation_id, kind = %kind, error = %err, "Bulk operation failed");
                self.audit
                    .failed(kind, caller_id, &operation_id, &err)
                    .await;
                Err(err)
            }
        }
    }

    /// Run every batch in order and collect per-item outcomes.
    ///
    /// `failure_id` names the items of a failed batch from the batch index,
    /// the position within the batch and the item. `dispatch` runs one batch
    /// and returns the ids of the written items.
    async fn run_batches<I, N, F, Fut>(
        &self,
        handle: &mut OperationHandle<'_>,
        batches: Vec<Vec<I>>,
        failure_id: N,
        mut dispatch: F,
    ) -> Result<Vec<ItemOutcome>, BulkError>
    where
        N: Fn(usize, usize, &I) -> String,
        F: FnMut(usize, Vec<I>) -> Fut,
        Fut: Future<Output = Result<Vec<String>, BulkError>>,
    {
        let total_batches = batches.len();
        let mut outcomes = Vec::with_capacity(handle.progress().total);

        for (index, batch) in batches.into_iter().enumerate() {
            let len = batch.len();
            let ids: Vec<String> = batch
                .iter()
                .enumerate()
                .map(|(position, item)| failure_id(index, position, item))
                .collect();

            match dispatch(index, batch).await {
                Ok(written) => {
                    outcomes.extend(written.into_iter().map(ItemOutcome::succeeded));
                    let progress = handle.progress_mut();
                    progress.record_processed(len);
                    progress.estimated_completion = estimate_completion(
                        progress.start_time,
                        Utc::now(),
                        index + 1,
                        total_batches,
                    );
                    handle.publish();
                    debug!(batch = index, items = len, "Batch completed");
                }
                Err(err) => {
                    let message = batch_error_message(&err);
                    warn!(batch = index, items = len, error = %err, "Batch failed");
                    outcomes.extend(
                        ids.into_iter()
                            .map(|id| ItemOutcome::failed(id, message.clone())),
                    );
                    handle.progress_mut().record_errors(len);
                    handle.publish();

                    let progress = handle.progress();
                    if progress.errors as f64 > progress.total as f64 * self.config.failure_threshold
                    {
                        return Err(BulkError::TooManyFailures {
                            errors: progress.errors,
                            total: progress.total,
                        });
                    }
                }
            }

            if index + 1 < total_batches && !self.config.delay_between_batches.is_zero() {
                sleep(self.config.delay_between_batches).await;
            }
        }

        Ok(outcomes)
    }

    /// Finish a run whose batches were all attempted.
    async fn complete(
        &self,
        handle: &mut OperationHandle<'_>,
        kind: BulkOperationType,
        caller_id: &str,
        outcomes: Vec<ItemOutcome>,
        started: Instant,
        extra: Map<String, Value>,
    ) -> Result<BulkOperationResult, BulkError> {
        let result = BulkOperationResult::from_outcomes(
            handle.progress().operation_id.clone(),
            outcomes,
            started.elapsed().as_millis() as u64,
        );

        let status = if result.error_count == 0 {
            OperationStatus::Completed
        } else {
            OperationStatus::Failed
        };
        handle.transition(status)?;

        info!(
            operation_id = %result.operation_id,
            processed = result.processed_count,
            errors = result.error_count,
            duration_ms = result.duration_ms,
            "Bulk {} finished",
            kind.as_str().to_lowercase()
        );

        self.audit.completed(kind, caller_id, &result, extra).await?;
        Ok(result)
    }
}

/// Drop documents identical to an earlier document, keeping the first one.
fn dedupe_documents(documents: Vec<Document>) -> Vec<Document> {
    let mut seen = HashSet::with_capacity(documents.len());
    documents
        .into_iter()
        .filter(|document| seen.insert(Value::Object(document.clone()).to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_id_format() {
        let id = generate_operation_id();
        let parts: Vec<&str> = id.split('_').collect();

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "bulk");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
        assert_ne!(id, generate_operation_id());
    }

    #[test]
    fn test_queue_keys_and_priorities() {
        assert_eq!(queue_key(BulkOperationType::Delete, "u1"), "bulk-delete-u1");
        assert!(priority(BulkOperationType::Create) > priority(BulkOperationType::Update));
        assert!(priority(BulkOperationType::Update) > priority(BulkOperationType::Delete));
    }

    #[test]
    fn test_batch_error_message_unwraps_store_errors() {
        let err = BulkError::Queue(QueueError::Work(StoreError::not_found("a/1")));
        assert_eq!(batch_error_message(&err), "Document not found: a/1");

        let err = BulkError::batch_execution("invalid data for document 7");
        assert_eq!(batch_error_message(&err), "invalid data for document 7");
    }

    #[test]
    fn test_dedupe_keeps_first_occurrence() {
        let a = json!({ "name": "Ana", "age": 30 }).as_object().cloned().unwrap();
        let b = json!({ "age": 30, "name": "Ana" }).as_object().cloned().unwrap();
        let c = json!({ "name": "Bia" }).as_object().cloned().unwrap();

        let kept = dedupe_documents(vec![a.clone(), c.clone(), b]);
        assert_eq!(kept, vec![a, c]);
    }
}
