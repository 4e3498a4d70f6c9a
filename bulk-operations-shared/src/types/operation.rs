//! Operation descriptors and record filters.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::document::Document;

/// The kind of mutation a bulk operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BulkOperationType {
    Create,
    Update,
    Delete,
}

impl BulkOperationType {
    /// Returns the upper-case wire name (`CREATE`, `UPDATE`, `DELETE`).
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkOperationType::Create => "CREATE",
            BulkOperationType::Update => "UPDATE",
            BulkOperationType::Delete => "DELETE",
        }
    }
}

impl fmt::Display for BulkOperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Comparison operator of a [`BulkFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not-in")]
    NotIn,
    #[serde(rename = "array-contains")]
    ArrayContains,
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "==",
            FilterOperator::NotEq => "!=",
            FilterOperator::Lt => "<",
            FilterOperator::Lte => "<=",
            FilterOperator::Gt => ">",
            FilterOperator::Gte => ">=",
            FilterOperator::In => "in",
            FilterOperator::NotIn => "not-in",
            FilterOperator::ArrayContains => "array-contains",
        }
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A simple predicate selecting records by a single field.
///
/// Used when an operation targets records by query rather than by an
/// explicit id list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkFilter {
    /// Top-level field name of the document.
    pub field: String,
    pub operator: FilterOperator,
    pub value: Value,
}

impl BulkFilter {
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// Evaluate the predicate against a document.
    ///
    /// Numbers compare numerically and strings lexicographically. Ordering
    /// operators never match values of different types. A missing field only
    /// matches `!=` and `not-in`.
    pub fn matches(&self, document: &Document) -> bool {
        let field = match document.get(&self.field) {
            Some(value) => value,
            None => {
                return matches!(self.operator, FilterOperator::NotEq | FilterOperator::NotIn)
            }
        };

        match self.operator {
            FilterOperator::Eq => values_equal(field, &self.value),
            FilterOperator::NotEq => !values_equal(field, &self.value),
            FilterOperator::Lt => compare_values(field, &self.value) == Some(Ordering::Less),
            FilterOperator::Lte => matches!(
                compare_values(field, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOperator::Gt => compare_values(field, &self.value) == Some(Ordering::Greater),
            FilterOperator::Gte => matches!(
                compare_values(field, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOperator::In => match &self.value {
                Value::Array(candidates) => candidates.iter().any(|c| values_equal(field, c)),
                _ => false,
            },
            FilterOperator::NotIn => match &self.value {
                Value::Array(candidates) => !candidates.iter().any(|c| values_equal(field, c)),
                _ => false,
            },
            FilterOperator::ArrayContains => match field {
                Value::Array(elements) => elements.iter().any(|e| values_equal(e, &self.value)),
                _ => false,
            },
        }
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        _ => left == right,
    }
}

fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// A single record operation, immutable once constructed.
///
/// Targets a document either by `document_id` or, for updates and deletes,
/// by a `filter` resolved against the store at execution time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkOperation {
    id: String,
    operation_type: BulkOperationType,
    collection: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    document_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<BulkFilter>,
    timestamp: DateTime<Utc>,
}

impl BulkOperation {
    fn build(
        operation_type: BulkOperationType,
        collection: impl Into<String>,
        document_id: Option<String>,
        data: Option<Document>,
        filter: Option<BulkFilter>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            operation_type,
            collection: collection.into(),
            document_id,
            data,
            filter,
            timestamp: Utc::now(),
        }
    }

    /// A new document to insert; the store assigns its id.
    pub fn create(collection: impl Into<String>, data: Document) -> Self {
        Self::build(BulkOperationType::Create, collection, None, Some(data), None)
    }

    /// A partial update of one document.
    pub fn update(
        collection: impl Into<String>,
        document_id: impl Into<String>,
        data: Document,
    ) -> Self {
        Self::build(
            BulkOperationType::Update,
            collection,
            Some(document_id.into()),
            Some(data),
            None,
        )
    }

    /// The same partial update applied to every document matching `filter`.
    pub fn update_matching(collection: impl Into<String>, filter: BulkFilter, data: Document) -> Self {
        Self::build(
            BulkOperationType::Update,
            collection,
            None,
            Some(data),
            Some(filter),
        )
    }

    /// Deletion of one document.
    pub fn delete(collection: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self::build(
            BulkOperationType::Delete,
            collection,
            Some(document_id.into()),
            None,
            None,
        )
    }

    /// Deletion of every document matching `filter`.
    pub fn delete_matching(collection: impl Into<String>, filter: BulkFilter) -> Self {
        Self::build(BulkOperationType::Delete, collection, None, None, Some(filter))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn operation_type(&self) -> BulkOperationType {
        self.operation_type
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn document_id(&self) -> Option<&str> {
        self.document_id.as_deref()
    }

    pub fn data(&self) -> Option<&Document> {
        self.data.as_ref()
    }

    pub fn filter(&self) -> Option<&BulkFilter> {
        self.filter.as_ref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("test documents must be objects"),
        }
    }

    #[test]
    fn test_equality_compares_numbers_numerically() {
        let filter = BulkFilter::new("age", FilterOperator::Eq, json!(30));
        assert!(filter.matches(&doc(json!({ "age": 30.0 }))));
        assert!(!filter.matches(&doc(json!({ "age": 31 }))));
    }

    #[test]
    fn test_ordering_operators() {
        let record = doc(json!({ "age": 30, "name": "Maria" }));

        assert!(BulkFilter::new("age", FilterOperator::Lt, json!(31)).matches(&record));
        assert!(BulkFilter::new("age", FilterOperator::Lte, json!(30)).matches(&record));
        assert!(BulkFilter::new("age", FilterOperator::Gt, json!(29.5)).matches(&record));
        assert!(BulkFilter::new("age", FilterOperator::Gte, json!(30)).matches(&record));
        assert!(BulkFilter::new("name", FilterOperator::Gt, json!("Ana")).matches(&record));
        // Mismatched types never order.
        assert!(!BulkFilter::new("age", FilterOperator::Lt, json!("99")).matches(&record));
    }

    #[test]
    fn test_membership_operators() {
        let record = doc(json!({ "status": "present", "tags": ["youth", "choir"] }));

        assert!(
            BulkFilter::new("status", FilterOperator::In, json!(["present", "late"]))
                .matches(&record)
        );
        assert!(
            !BulkFilter::new("status", FilterOperator::NotIn, json!(["present"])).matches(&record)
        );
        assert!(
            BulkFilter::new("tags", FilterOperator::ArrayContains, json!("choir")).matches(&record)
        );
        assert!(
            !BulkFilter::new("status", FilterOperator::ArrayContains, json!("p")).matches(&record)
        );
    }

    #[test]
    fn test_missing_field() {
        let record = doc(json!({ "name": "João" }));

        assert!(BulkFilter::new("age", FilterOperator::NotEq, json!(1)).matches(&record));
        assert!(BulkFilter::new("age", FilterOperator::NotIn, json!([1])).matches(&record));
        assert!(!BulkFilter::new("age", FilterOperator::Eq, json!(1)).matches(&record));
        assert!(!BulkFilter::new("age", FilterOperator::Lt, json!(1)).matches(&record));
    }

    #[test]
    fn test_operator_wire_names() {
        let filter: BulkFilter =
            serde_json::from_value(json!({ "field": "a", "operator": "not-in", "value": [1] }))
                .unwrap();
        assert_eq!(filter.operator, FilterOperator::NotIn);
        assert_eq!(
            serde_json::to_value(BulkOperationType::Delete).unwrap(),
            json!("DELETE")
        );
    }

    #[test]
    fn test_operation_constructors() {
        let op = BulkOperation::delete("attendance", "abc");
        assert_eq!(op.operation_type(), BulkOperationType::Delete);
        assert_eq!(op.document_id(), Some("abc"));
        assert!(op.data().is_none());

        let filter = BulkFilter::new("service", FilterOperator::Eq, json!("sunday"));
        let op = BulkOperation::delete_matching("attendance", filter.clone());
        assert_eq!(op.filter(), Some(&filter));
        assert!(op.document_id().is_none());
    }
}
