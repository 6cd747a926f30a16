//! Persistent document storage.
//!
//! Bills and tenants live in a path-addressed document store
//! (`clients/{clientId}/bills/{billId}`). Every document carries a version
//! that is bumped on each write, which is what the ledger uses for
//! compare-and-swap updates.

pub mod documents;
pub mod memory;
pub mod postgres;
pub mod retry;

pub use documents::{BillDocument, PeriodClaimDocument};
pub use memory::MemoryDocumentStore;
pub use postgres::PgDocumentStore;
pub use retry::RetryPolicy;

use crate::domain::types::{BillId, ClientId, FeePeriod};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

pub const CLIENTS: &str = "clients";
pub const BILLS: &str = "bills";
pub const BILL_PERIODS: &str = "billPeriods";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {message}")]
    Unavailable { message: String },

    #[error("document already exists: {path}")]
    AlreadyExists { path: String },

    #[error("version conflict on {path}: expected {expected}")]
    VersionConflict { path: String, expected: u64 },

    #[error("document not found: {path}")]
    NotFound { path: String },

    #[error("malformed document {path}: {message}")]
    Malformed { path: String, message: String },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

fn escape_segment(segment: &str) -> String {
    segment.replace('%', "%25").replace('/', "%2F")
}

/// Path of a collection, e.g. `clients/c1/bills`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn clients() -> Self {
        Self(CLIENTS.to_string())
    }

    pub fn bills(client_id: &ClientId) -> Self {
        Self(format!(
            "{}/{}/{}",
            CLIENTS,
            escape_segment(client_id.as_str()),
            BILLS
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last segment, shared by every collection of the same kind.
    pub fn collection_id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn doc(&self, id: &str) -> DocumentPath {
        DocumentPath(format!("{}/{}", self.0, escape_segment(id)))
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Path of a single document, e.g. `clients/c1/bills/{uuid}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentPath(String);

impl DocumentPath {
    pub fn client(client_id: &ClientId) -> Self {
        CollectionPath::clients().doc(client_id.as_str())
    }

    pub fn bill(client_id: &ClientId, bill_id: &BillId) -> Self {
        CollectionPath::bills(client_id).doc(&bill_id.to_string())
    }

    /// Uniqueness marker for one client/resource/period triple.
    pub fn period_claim(client_id: &ClientId, resource: &str, fee_period: &FeePeriod) -> Self {
        let key = format!(
            "{}:{}",
            escape_segment(resource).replace(':', "%3A"),
            fee_period
        );
        DocumentPath(format!(
            "{}/{}/{}/{}",
            CLIENTS,
            escape_segment(client_id.as_str()),
            BILL_PERIODS,
            escape_segment(&key)
        ))
    }

    /// Wrap a path read back from the store.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn parent(&self) -> CollectionPath {
        match self.0.rsplit_once('/') {
            Some((parent, _)) => CollectionPath(parent.to_string()),
            None => CollectionPath(String::new()),
        }
    }

    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn collection_id(&self) -> String {
        self.parent().collection_id().to_string()
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub path: DocumentPath,
    pub version: u64,
    pub data: Value,
}

/// Equality filter on a top-level document field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub value: Value,
}

impl FieldFilter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn matches(&self, data: &Value) -> bool {
        data.get(&self.field) == Some(&self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            descending: false,
        }
    }

    pub fn desc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            descending: true,
        }
    }

    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        let ord = compare_field(a.get(&self.field), b.get(&self.field));
        if self.descending {
            ord.reverse()
        } else {
            ord
        }
    }
}

/// Missing values sort last in ascending order.
fn compare_field(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

/// Path-addressed document store with conditional writes.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &DocumentPath) -> StoreResult<Option<StoredDocument>>;

    /// Unconditional create-or-replace. Returns the new version.
    async fn set(&self, path: &DocumentPath, data: Value) -> StoreResult<u64>;

    /// Create every document or none of them. Fails with `AlreadyExists`
    /// naming the first path that is taken.
    async fn create_all(&self, docs: Vec<(DocumentPath, Value)>) -> StoreResult<()>;

    /// Replace a document only if its version still equals `expected_version`.
    async fn update(
        &self,
        path: &DocumentPath,
        data: Value,
        expected_version: u64,
    ) -> StoreResult<u64>;

    async fn query(
        &self,
        collection: &CollectionPath,
        filters: &[FieldFilter],
        order_by: Option<&OrderBy>,
    ) -> StoreResult<Vec<StoredDocument>>;

    /// Query every collection named `collection_id`, whatever its parent.
    async fn query_group(
        &self,
        collection_id: &str,
        filters: &[FieldFilter],
        order_by: Option<&OrderBy>,
    ) -> StoreResult<Vec<StoredDocument>>;
}
