use crate::storage::{
    CollectionPath, DocumentPath, DocumentStore, FieldFilter, OrderBy, StoreError, StoreResult,
    StoredDocument,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct Entry {
    version: u64,
    data: Value,
}

/// In-process document store used by tests and `storage.backend = "memory"`.
///
/// All writes take the single write lock, which gives the same atomicity the
/// PostgreSQL store gets from transactions.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentStore {
    documents: Arc<RwLock<BTreeMap<DocumentPath, Entry>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    fn select<'a>(
        documents: impl Iterator<Item = (&'a DocumentPath, &'a Entry)>,
        filters: &[FieldFilter],
        order_by: Option<&OrderBy>,
    ) -> Vec<StoredDocument> {
        let mut matched: Vec<StoredDocument> = documents
            .filter(|(_, entry)| filters.iter().all(|f| f.matches(&entry.data)))
            .map(|(path, entry)| StoredDocument {
                path: path.clone(),
                version: entry.version,
                data: entry.data.clone(),
            })
            .collect();

        if let Some(order) = order_by {
            matched.sort_by(|a, b| order.compare(&a.data, &b.data));
        }
        matched
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, path: &DocumentPath) -> StoreResult<Option<StoredDocument>> {
        let documents = self.documents.read().await;
        Ok(documents.get(path).map(|entry| StoredDocument {
            path: path.clone(),
            version: entry.version,
            data: entry.data.clone(),
        }))
    }

    async fn set(&self, path: &DocumentPath, data: Value) -> StoreResult<u64> {
        let mut documents = self.documents.write().await;
        let version = documents.get(path).map(|e| e.version + 1).unwrap_or(1);
        documents.insert(path.clone(), Entry { version, data });
        Ok(version)
    }

    async fn create_all(&self, docs: Vec<(DocumentPath, Value)>) -> StoreResult<()> {
        let mut documents = self.documents.write().await;

        for (i, (path, _)) in docs.iter().enumerate() {
            let repeated = docs[..i].iter().any(|(p, _)| p == path);
            if repeated || documents.contains_key(path) {
                return Err(StoreError::AlreadyExists {
                    path: path.to_string(),
                });
            }
        }

        for (path, data) in docs {
            documents.insert(path, Entry { version: 1, data });
        }
        Ok(())
    }

    async fn update(
        &self,
        path: &DocumentPath,
        data: Value,
        expected_version: u64,
    ) -> StoreResult<u64> {
        let mut documents = self.documents.write().await;
        let entry = documents
            .get_mut(path)
            .ok_or_else(|| StoreError::NotFound {
                path: path.to_string(),
            })?;

        if entry.version != expected_version {
            return Err(StoreError::VersionConflict {
                path: path.to_string(),
                expected: expected_version,
            });
        }

        entry.version += 1;
        entry.data = data;
        Ok(entry.version)
    }

    async fn query(
        &self,
        collection: &CollectionPath,
        filters: &[FieldFilter],
        order_by: Option<&OrderBy>,
    ) -> StoreResult<Vec<StoredDocument>> {
        let documents = self.documents.read().await;
        Ok(Self::select(
            documents.iter().filter(|(path, _)| path.parent() == *collection),
            filters,
            order_by,
        ))
    }

    async fn query_group(
        &self,
        collection_id: &str,
        filters: &[FieldFilter],
        order_by: Option<&OrderBy>,
    ) -> StoreResult<Vec<StoredDocument>> {
        let documents = self.documents.read().await;
        Ok(Self::select(
            documents
                .iter()
                .filter(|(path, _)| path.collection_id() == collection_id),
            filters,
            order_by,
        ))
    }
}
