//! Execution of heterogeneous operation lists.

use bulk_operations_shared::{
    BulkOperation, BulkOperationResult, BulkOperationType, Document, DocumentUpdate,
};
use tracing::{debug, instrument};

use super::options::OperationOptions;
use super::BulkOperationService;
use crate::errors::BulkError;

/// Consecutive operations sharing a kind and a collection.
struct OperationGroup {
    kind: BulkOperationType,
    collection: String,
    operations: Vec<BulkOperation>,
}

fn group_operations(operations: Vec<BulkOperation>) -> Vec<OperationGroup> {
    let mut groups: Vec<OperationGroup> = Vec::new();
    for operation in operations {
        match groups.last_mut() {
            Some(group)
                if group.kind == operation.operation_type()
                    && group.collection == operation.collection() =>
            {
                group.operations.push(operation);
            }
            _ => groups.push(OperationGroup {
                kind: operation.operation_type(),
                collection: operation.collection().to_string(),
                operations: vec![operation],
            }),
        }
    }
    groups
}

fn require_data(operation: &BulkOperation) -> Result<Document, BulkError> {
    operation.data().cloned().ok_or_else(|| {
        BulkError::invalid_argument(format!("operation {} carries no data", operation.id()))
    })
}

impl BulkOperationService {
    /// Run a list of operations.
    ///
    /// Consecutive operations of the same kind on the same collection run as
    /// one bulk operation. Filters are resolved to document ids just before
    /// their group runs. Stops at the first failing group.
    ///
    /// # Returns
    ///
    /// One result per group that ran, in order.
    #[instrument(skip(self, operations, options), fields(count = operations.len(), caller_id = %options.caller_id))]
    pub async fn submit(
        &self,
        operations: Vec<BulkOperation>,
        options: OperationOptions,
    ) -> Result<Vec<BulkOperationResult>, BulkError> {
        if operations.is_empty() {
            return Err(BulkError::invalid_argument("operation list must not be empty"));
        }

        let mut results = Vec::new();
        for group in group_operations(operations) {
            let OperationGroup {
                kind,
                collection,
                operations,
            } = group;

            let result = match kind {
                BulkOperationType::Create => {
                    let documents = operations
                        .iter()
                        .map(require_data)
                        .collect::<Result<Vec<_>, _>>()?;
                    self.bulk_create(&collection, documents, options.create_options())
                        .await?
                }
                BulkOperationType::Update => {
                    let updates = self.resolve_updates(&collection, &operations).await?;
                    if updates.is_empty() {
                        debug!(collection = %collection, "No documents matched, skipping update group");
                        continue;
                    }
                    self.bulk_update(&collection, updates, options.update_options())
                        .await?
                }
                BulkOperationType::Delete => {
                    let ids = self.resolve_ids(&collection, &operations).await?;
                    if ids.is_empty() {
                        debug!(collection = %collection, "No documents matched, skipping delete group");
                        continue;
                    }
                    self.bulk_delete(&collection, ids, options.delete_options())
                        .await?
                }
            };
            results.push(result);
        }
        Ok(results)
    }

    /// Target ids of each operation, in order.
    async fn resolve_ids(
        &self,
        collection: &str,
        operations: &[BulkOperation],
    ) -> Result<Vec<String>, BulkError> {
        let mut ids = Vec::with_capacity(operations.len());
        for operation in operations {
            ids.extend(self.targets_of(collection, operation).await?);
        }
        Ok(ids)
    }

    async fn resolve_updates(
        &self,
        collection: &str,
        operations: &[BulkOperation],
    ) -> Result<Vec<DocumentUpdate>, BulkError> {
        let mut updates = Vec::with_capacity(operations.len());
        for operation in operations {
            let data = require_data(operation)?;
            let targets = self.targets_of(collection, operation).await?;
            updates.extend(
                targets
                    .into_iter()
                    .map(|id| DocumentUpdate::new(id, data.clone())),
            );
        }
        Ok(updates)
    }

    async fn targets_of(
        &self,
        collection: &str,
        operation: &BulkOperation,
    ) -> Result<Vec<String>, BulkError> {
        if let Some(id) = operation.document_id() {
            return Ok(vec![id.to_string()]);
        }
        match operation.filter() {
            Some(filter) => {
                let ids = self.store.find_ids(collection, filter).await?;
                debug!(collection, field = %filter.field, matched = ids.len(), "Filter resolved");
                Ok(ids)
            }
            None => Err(BulkError::invalid_argument(format!(
                "operation {} has neither a document id nor a filter",
                operation.id()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn test_groups_consecutive_operations_only() {
        let operations = vec![
            BulkOperation::delete("members", "1"),
            BulkOperation::delete("members", "2"),
            BulkOperation::delete("visitors", "3"),
            BulkOperation::create("members", Map::new()),
            BulkOperation::delete("members", "4"),
        ];

        let groups = group_operations(operations);
        let shape: Vec<(BulkOperationType, &str, usize)> = groups
            .iter()
            .map(|g| (g.kind, g.collection.as_str(), g.operations.len()))
            .collect();

        assert_eq!(
            shape,
            vec![
                (BulkOperationType::Delete, "members", 2),
                (BulkOperationType::Delete, "visitors", 1),
                (BulkOperationType::Create, "members", 1),
                (BulkOperationType::Delete, "members", 1),
            ]
        );
    }
}
