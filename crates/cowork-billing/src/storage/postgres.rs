use crate::config::DatabaseConfig;
use crate::storage::{
    CollectionPath, DocumentPath, DocumentStore, FieldFilter, OrderBy, StoreError, StoreResult,
    StoredDocument,
};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, info};

fn unavailable(operation: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable {
        message: format!("{}: {}", operation, e),
    }
}

/// Document store backed by a single PostgreSQL `documents` table holding
/// JSONB bodies. Conditional updates compare the `version` column; multi
/// document creates run in one transaction.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_seconds)))
            .max_lifetime(Some(Duration::from_secs(config.max_lifetime_seconds)))
            .connect(&config.url)
            .await
            .map_err(|e| unavailable("connect", e))?;

        info!(
            max_connections = config.max_connections,
            "Connected to billing database"
        );
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> StoreResult<()> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| unavailable("migrate", e))?;
        info!("Database migrations completed successfully");
        Ok(())
    }

    fn document_from_row(row: &PgRow) -> StoreResult<StoredDocument> {
        let path: String = row.try_get("path").map_err(|e| unavailable("decode", e))?;
        let version: i64 = row.try_get("version").map_err(|e| unavailable("decode", e))?;
        let data: Value = row.try_get("data").map_err(|e| unavailable("decode", e))?;

        Ok(StoredDocument {
            path: DocumentPath::from_raw(path),
            version: version as u64,
            data,
        })
    }

    /// Equality filters become a single JSONB containment test.
    fn containment(filters: &[FieldFilter]) -> Value {
        let mut object = Map::new();
        for filter in filters {
            object.insert(filter.field.clone(), filter.value.clone());
        }
        Value::Object(object)
    }

    async fn select(
        &self,
        scope_column: &str,
        scope: &str,
        filters: &[FieldFilter],
        order_by: Option<&OrderBy>,
    ) -> StoreResult<Vec<StoredDocument>> {
        let mut sql = format!(
            "SELECT path, version, data FROM documents WHERE {} = $1 AND data @> $2",
            scope_column
        );
        if let Some(order) = order_by {
            sql.push_str(if order.descending {
                " ORDER BY data ->> $3 DESC NULLS LAST"
            } else {
                " ORDER BY data ->> $3 ASC NULLS LAST"
            });
        }

        let mut query = sqlx::query(&sql)
            .bind(scope)
            .bind(Self::containment(filters));
        if let Some(order) = order_by {
            query = query.bind(order.field.clone());
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| unavailable("query", e))?;

        rows.iter().map(Self::document_from_row).collect()
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get(&self, path: &DocumentPath) -> StoreResult<Option<StoredDocument>> {
        let row = sqlx::query("SELECT path, version, data FROM documents WHERE path = $1")
            .bind(path.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| unavailable("get", e))?;

        row.as_ref().map(Self::document_from_row).transpose()
    }

    async fn set(&self, path: &DocumentPath, data: Value) -> StoreResult<u64> {
        let row = sqlx::query(
            r#"
            INSERT INTO documents (path, parent, collection_id, data, version)
            VALUES ($1, $2, $3, $4, 1)
            ON CONFLICT (path) DO UPDATE
            SET data = EXCLUDED.data, version = documents.version + 1, updated_at = now()
            RETURNING version
            "#,
        )
        .bind(path.as_str())
        .bind(path.parent().as_str())
        .bind(path.collection_id())
        .bind(data)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| unavailable("set", e))?;

        let version: i64 = row.try_get("version").map_err(|e| unavailable("set", e))?;
        Ok(version as u64)
    }

    async fn create_all(&self, docs: Vec<(DocumentPath, Value)>) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| unavailable("begin", e))?;

        for (path, data) in docs {
            let result = sqlx::query(
                r#"
                INSERT INTO documents (path, parent, collection_id, data, version)
                VALUES ($1, $2, $3, $4, 1)
                ON CONFLICT (path) DO NOTHING
                "#,
            )
            .bind(path.as_str())
            .bind(path.parent().as_str())
            .bind(path.collection_id())
            .bind(data)
            .execute(&mut *tx)
            .await
            .map_err(|e| unavailable("create", e))?;

            if result.rows_affected() == 0 {
                debug!(path = %path, "Document already exists, rolling back create");
                tx.rollback()
                    .await
                    .map_err(|e| unavailable("rollback", e))?;
                return Err(StoreError::AlreadyExists {
                    path: path.to_string(),
                });
            }
        }

        tx.commit().await.map_err(|e| unavailable("commit", e))?;
        Ok(())
    }

    async fn update(
        &self,
        path: &DocumentPath,
        data: Value,
        expected_version: u64,
    ) -> StoreResult<u64> {
        let row = sqlx::query(
            r#"
            UPDATE documents
            SET data = $2, version = version + 1, updated_at = now()
            WHERE path = $1 AND version = $3
            RETURNING version
            "#,
        )
        .bind(path.as_str())
        .bind(data)
        .bind(expected_version as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| unavailable("update", e))?;

        if let Some(row) = row {
            let version: i64 = row.try_get("version").map_err(|e| unavailable("update", e))?;
            return Ok(version as u64);
        }

        let exists = sqlx::query("SELECT 1 FROM documents WHERE path = $1")
            .bind(path.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| unavailable("update", e))?
            .is_some();

        if exists {
            Err(StoreError::VersionConflict {
                path: path.to_string(),
                expected: expected_version,
            })
        } else {
            Err(StoreError::NotFound {
                path: path.to_string(),
            })
        }
    }

    async fn query(
        &self,
        collection: &CollectionPath,
        filters: &[FieldFilter],
        order_by: Option<&OrderBy>,
    ) -> StoreResult<Vec<StoredDocument>> {
        self.select("parent", collection.as_str(), filters, order_by)
            .await
    }

    async fn query_group(
        &self,
        collection_id: &str,
        filters: &[FieldFilter],
        order_by: Option<&OrderBy>,
    ) -> StoreResult<Vec<StoredDocument>> {
        self.select("collection_id", collection_id, filters, order_by)
            .await
    }
}
