//! PostgreSQL document store.
//!
//! Documents live in a single `documents` table as JSONB payloads keyed by
//! `(collection, id)`. Partial updates use the JSONB concatenation operator
//! and filters are translated to JSONB predicates.

use std::collections::HashMap;

use async_trait::async_trait;
use bulk_operations_shared::{BulkFilter, Document, DocumentUpdate, FilterOperator, StoredDocument};
use futures::future::try_join_all;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::errors::StoreError;
use crate::interfaces::{DocumentStore, MAX_IDS_PER_LOOKUP};

/// PostgreSQL implementation of [`DocumentStore`].
///
/// Update batches run inside a single transaction and are rolled back if any
/// targeted document is missing.
pub struct PostgresDocumentStore {
    pool: sqlx::PgPool,
}

impl PostgresDocumentStore {
    /// Creates a store over an existing pool.
    ///
    /// # Arguments
    ///
    /// * `pool` - Connection pool whose database has the `documents` table
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    /// Connects to `url` and returns a store.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = sqlx::PgPool::connect(url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }

    async fn insert_document(&self, collection: &str, document: &Document) -> Result<String, StoreError> {
        let id = Uuid::new_v4().simple().to_string();
        sqlx::query("INSERT INTO documents (collection, id, data) VALUES ($1, $2, $3)")
            .bind(collection)
            .bind(&id)
            .bind(Json(document))
            .execute(&self.pool)
            .await?;
        Ok(id)
    }
}

/// Appends the SQL predicate for `filter` to `builder`.
///
/// Ordering operators only match values of the same JSON type, and a missing
/// field only matches `!=` and `not-in`.
fn push_filter_predicate(builder: &mut QueryBuilder<'_, Postgres>, filter: &BulkFilter) {
    let field = filter.field.clone();
    let value = || Json(filter.value.clone());

    match filter.operator {
        FilterOperator::Eq => {
            builder
                .push("data -> ")
                .push_bind(field)
                .push(" = ")
                .push_bind(value());
        }
        FilterOperator::NotEq => {
            builder
                .push("(data -> ")
                .push_bind(field.clone())
                .push(" IS NULL OR data -> ")
                .push_bind(field)
                .push(" <> ")
                .push_bind(value())
                .push(")");
        }
        FilterOperator::Lt | FilterOperator::Lte | FilterOperator::Gt | FilterOperator::Gte => {
            let op = match filter.operator {
                FilterOperator::Lt => " < ",
                FilterOperator::Lte => " <= ",
                FilterOperator::Gt => " > ",
                _ => " >= ",
            };
            builder
                .push("jsonb_typeof(data -> ")
                .push_bind(field.clone())
                .push(") IN ('number', 'string') AND jsonb_typeof(data -> ")
                .push_bind(field.clone())
                .push(") = jsonb_typeof(")
                .push_bind(value())
                .push(") AND data -> ")
                .push_bind(field)
                .push(op)
                .push_bind(value());
        }
        FilterOperator::In => {
            builder
                .push("data -> ")
                .push_bind(field.clone())
                .push(" IS NOT NULL AND ")
                .push_bind(value())
                .push(" @> jsonb_build_array(data -> ")
                .push_bind(field)
                .push(")");
        }
        FilterOperator::NotIn => {
            builder
                .push("(data -> ")
                .push_bind(field.clone())
                .push(" IS NULL OR NOT (")
                .push_bind(value())
                .push(" @> jsonb_build_array(data -> ")
                .push_bind(field)
                .push(")))");
        }
        FilterOperator::ArrayContains => {
            builder
                .push("jsonb_typeof(data -> ")
                .push_bind(field.clone())
                .push(") = 'array' AND data -> ")
                .push_bind(field)
                .push(" @> jsonb_build_array(")
                .push_bind(value())
                .push(")");
        }
    }
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    #[instrument(skip(self, updates), fields(count = updates.len()))]
    async fn batch_update(
        &self,
        collection: &str,
        updates: &[DocumentUpdate],
    ) -> Result<(), StoreError> {
        if updates.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for update in updates {
            let result = sqlx::query(
                "UPDATE documents SET data = data || $3, updated_at = NOW() \
                 WHERE collection = $1 AND id = $2",
            )
            .bind(collection)
            .bind(&update.document_id)
            .bind(Json(&update.data))
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                // Dropping the transaction rolls back the writes done so far.
                return Err(StoreError::not_found(format!(
                    "{}/{}",
                    collection, update.document_id
                )));
            }
        }
        tx.commit().await?;

        debug!(collection, count = updates.len(), "Batch update committed");
        Ok(())
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn batch_delete(&self, collection: &str, ids: &[String]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }

        let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = ANY($2)")
            .bind(collection)
            .bind(ids)
            .execute(&self.pool)
            .await?;

        debug!(collection, deleted = result.rows_affected(), "Batch delete committed");
        Ok(())
    }

    #[instrument(skip(self, documents), fields(count = documents.len()))]
    async fn create_documents(
        &self,
        collection: &str,
        documents: &[Document],
    ) -> Result<Vec<String>, StoreError> {
        try_join_all(
            documents
                .iter()
                .map(|document| self.insert_document(collection, document)),
        )
        .await
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
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query("SELECT id, data FROM documents WHERE collection = $1 AND id = ANY($2)")
            .bind(collection)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;

        let mut found = HashMap::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            let Json(data): Json<Document> = row.try_get("data")?;
            found.insert(id, data);
        }

        Ok(ids
            .iter()
            .filter_map(|id| {
                found.remove(id).map(|data| StoredDocument {
                    id: id.clone(),
                    data,
                })
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn find_ids(
        &self,
        collection: &str,
        filter: &BulkFilter,
    ) -> Result<Vec<String>, StoreError> {
        if matches!(filter.operator, FilterOperator::In | FilterOperator::NotIn)
            && !matches!(filter.value, Value::Array(_))
        {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Postgres>::new("SELECT id FROM documents WHERE collection = ");
        builder.push_bind(collection.to_string()).push(" AND ");
        push_filter_predicate(&mut builder, filter);
        builder.push(" ORDER BY id");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("id").map_err(StoreError::from))
            .collect()
    }
}
