//! PostgreSQL-backed [`DocumentStore`] over the `monitor_documents` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::document::{Collection, DocumentFilter, StoredDocument};
use crate::error::StoreError;
use crate::store::{validate_index_field, DocumentStore};

/// Column list for `monitor_documents` queries.
const COLUMNS: &str = "id, collection, account_key, recorded_at, body";

#[derive(Debug, sqlx::FromRow)]
struct DocumentRow {
    id: Uuid,
    collection: String,
    account_key: String,
    recorded_at: DateTime<Utc>,
    body: serde_json::Value,
}

impl TryFrom<DocumentRow> for StoredDocument {
    type Error = StoreError;

    fn try_from(row: DocumentRow) -> Result<Self, Self::Error> {
        let collection = Collection::parse(&row.collection).ok_or_else(|| {
            StoreError::Corrupt(format!("unknown collection '{}'", row.collection))
        })?;
        Ok(StoredDocument {
            id: row.id,
            collection,
            account_key: row.account_key,
            recorded_at: row.recorded_at,
            body: row.body,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn insert(&self, doc: StoredDocument) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO monitor_documents (id, collection, account_key, recorded_at, body) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(doc.id)
        .bind(doc.collection.as_str())
        .bind(&doc.account_key)
        .bind(doc.recorded_at)
        .bind(&doc.body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find(
        &self,
        collection: Collection,
        filter: &DocumentFilter,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM monitor_documents \
             WHERE collection = $1 \
               AND ($2::text IS NULL OR account_key = $2) \
               AND ($3::timestamptz IS NULL OR recorded_at >= $3) \
               AND ($4::timestamptz IS NULL OR recorded_at <= $4) \
             ORDER BY recorded_at DESC \
             LIMIT $5"
        );
        let rows = sqlx::query_as::<_, DocumentRow>(&query)
            .bind(collection.as_str())
            .bind(filter.account_key.as_deref())
            .bind(filter.since)
            .bind(filter.until)
            .bind(filter.limit.map(|l| l as i64))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(StoredDocument::try_from).collect()
    }

    async fn delete_older_than(
        &self,
        collection: Collection,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result =
            sqlx::query("DELETE FROM monitor_documents WHERE collection = $1 AND recorded_at < $2")
                .bind(collection.as_str())
                .bind(cutoff)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn ensure_index(&self, collection: Collection, field: &str) -> Result<(), StoreError> {
        validate_index_field(field)?;
        let name = collection.as_str();
        let ddl = format!(
            "CREATE INDEX IF NOT EXISTS idx_monitor_documents_{name}_{field} \
             ON monitor_documents ((body->>'{field}')) \
             WHERE collection = '{name}'"
        );
        sqlx::query(&ddl).execute(&self.pool).await?;
        tracing::debug!(collection = name, field, "Document index ensured");
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        crate::health_check(&self.pool).await?;
        Ok(())
    }
}
