//! In-process [`DocumentStore`] used by tests and when no database is configured.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::document::{Collection, DocumentFilter, StoredDocument};
use crate::error::StoreError;
use crate::store::{validate_index_field, DocumentStore};

#[derive(Debug)]
pub struct MemoryStore {
    documents: RwLock<HashMap<Collection, Vec<StoredDocument>>>,
    indexes: RwLock<HashSet<(Collection, String)>>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            indexes: RwLock::new(HashSet::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: while unavailable every call fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub async fn count(&self, collection: Collection) -> usize {
        self.documents
            .read()
            .await
            .get(&collection)
            .map_or(0, Vec::len)
    }

    pub async fn has_index(&self, collection: Collection, field: &str) -> bool {
        self.indexes
            .read()
            .await
            .contains(&(collection, field.to_string()))
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store marked unavailable".into()))
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert(&self, doc: StoredDocument) -> Result<(), StoreError> {
        self.check_available()?;
        self.documents
            .write()
            .await
            .entry(doc.collection)
            .or_default()
            .push(doc);
        Ok(())
    }

    async fn find(
        &self,
        collection: Collection,
        filter: &DocumentFilter,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        self.check_available()?;
        let documents = self.documents.read().await;
        let mut found: Vec<StoredDocument> = documents
            .get(&collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default();
        found.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        if let Some(limit) = filter.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    async fn delete_older_than(
        &self,
        collection: Collection,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.check_available()?;
        let mut documents = self.documents.write().await;
        let Some(docs) = documents.get_mut(&collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|d| d.recorded_at >= cutoff);
        Ok((before - docs.len()) as u64)
    }

    async fn ensure_index(&self, collection: Collection, field: &str) -> Result<(), StoreError> {
        self.check_available()?;
        validate_index_field(field)?;
        self.indexes
            .write()
            .await
            .insert((collection, field.to_string()));
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Duration;
    use serde_json::json;

    use super::*;

    fn doc(account: &str, at: DateTime<Utc>) -> StoredDocument {
        StoredDocument::new(Collection::ScanSamples, account, at, json!({ "duration_ms": 1000 }))
    }

    #[tokio::test]
    async fn find_returns_newest_first_with_limit() {
        let store = MemoryStore::new();
        let now = Utc::now();
        for i in 0..5 {
            store.insert(doc("acc-1", now - Duration::minutes(i))).await.unwrap();
        }
        store.insert(doc("acc-2", now)).await.unwrap();

        let found = store
            .find(Collection::ScanSamples, &DocumentFilter::for_account("acc-1").with_limit(3))
            .await
            .unwrap();
        assert_eq!(found.len(), 3);
        assert!(found.windows(2).all(|w| w[0].recorded_at >= w[1].recorded_at));
        assert!(found.iter().all(|d| d.account_key == "acc-1"));
    }

    #[tokio::test]
    async fn delete_older_than_is_idempotent() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.insert(doc("acc-1", now - Duration::days(10))).await.unwrap();
        store.insert(doc("acc-1", now)).await.unwrap();

        let cutoff = now - Duration::days(7);
        assert_eq!(store.delete_older_than(Collection::ScanSamples, cutoff).await.unwrap(), 1);
        assert_eq!(store.delete_older_than(Collection::ScanSamples, cutoff).await.unwrap(), 0);
        assert_eq!(store.count(Collection::ScanSamples).await, 1);
    }

    #[tokio::test]
    async fn collections_are_isolated() {
        let store = MemoryStore::new();
        store.insert(doc("acc-1", Utc::now())).await.unwrap();
        let found = store
            .find(Collection::HealthReports, &DocumentFilter::default())
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert_matches!(store.health_check().await, Err(StoreError::Unavailable(_)));
        assert_matches!(
            store.insert(doc("acc-1", Utc::now())).await,
            Err(StoreError::Unavailable(_))
        );
        store.set_available(true);
        store.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn ensure_index_records_field() {
        let store = MemoryStore::new();
        store.ensure_index(Collection::Notifications, "type").await.unwrap();
        assert!(store.has_index(Collection::Notifications, "type").await);
        assert_matches!(
            store.ensure_index(Collection::Notifications, "bad field").await,
            Err(StoreError::InvalidIndexField(_))
        );
    }
}
