//! Best-effort writes to the document store.

use fleetwatch_core::types::Timestamp;
use fleetwatch_db::{Collection, SharedStore, StoredDocument};
use serde::Serialize;

/// Insert `value` into `collection`, logging instead of failing. A missing
/// store is a no-op.
pub(crate) async fn persist_best_effort<T: Serialize>(
    store: Option<&SharedStore>,
    collection: Collection,
    account_key: &str,
    recorded_at: Timestamp,
    value: &T,
) {
    let Some(store) = store else {
        return;
    };
    let doc = match StoredDocument::from_serializable(collection, account_key, recorded_at, value) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::error!(collection = %collection, error = %e, "Failed to encode document");
            return;
        }
    };
    if let Err(e) = store.insert(doc).await {
        tracing::warn!(
            collection = %collection,
            account_id = account_key,
            error = %e,
            "Failed to persist document"
        );
    }
}
