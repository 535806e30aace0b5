use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::document::{Collection, DocumentFilter, StoredDocument};
use crate::error::StoreError;

/// Append-only document persistence.
///
/// Callers in the monitor treat every method as best-effort: failures are
/// logged and the in-memory pipeline carries on.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert(&self, doc: StoredDocument) -> Result<(), StoreError>;

    /// Documents matching `filter`, newest first.
    async fn find(
        &self,
        collection: Collection,
        filter: &DocumentFilter,
    ) -> Result<Vec<StoredDocument>, StoreError>;

    /// Delete documents recorded strictly before `cutoff`. Returns the count.
    async fn delete_older_than(
        &self,
        collection: Collection,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Create an index on a body field if it does not exist yet.
    async fn ensure_index(&self, collection: Collection, field: &str) -> Result<(), StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

pub type SharedStore = Arc<dyn DocumentStore>;

/// Index field names are interpolated into DDL, so only `[a-z0-9_]` is allowed.
pub fn validate_index_field(field: &str) -> Result<(), StoreError> {
    let valid = !field.is_empty()
        && field
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidIndexField(field.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_fields_are_restricted() {
        assert!(validate_index_field("account_id").is_ok());
        assert!(validate_index_field("timestamp").is_ok());
        assert!(validate_index_field("").is_err());
        assert!(validate_index_field("x'); DROP TABLE t; --").is_err());
        assert!(validate_index_field("Account").is_err());
    }
}
