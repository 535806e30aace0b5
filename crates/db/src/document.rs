//! Stored document shape and query filter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

/// Collection names.
pub const COLLECTION_SCAN_SAMPLES: &str = "scan_samples";
pub const COLLECTION_HEALTH_REPORTS: &str = "health_reports";
pub const COLLECTION_DIAGNOSTICS: &str = "diagnostics";
pub const COLLECTION_NOTIFICATIONS: &str = "notifications";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    ScanSamples,
    HealthReports,
    Diagnostics,
    Notifications,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::ScanSamples,
        Collection::HealthReports,
        Collection::Diagnostics,
        Collection::Notifications,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::ScanSamples => COLLECTION_SCAN_SAMPLES,
            Collection::HealthReports => COLLECTION_HEALTH_REPORTS,
            Collection::Diagnostics => COLLECTION_DIAGNOSTICS,
            Collection::Notifications => COLLECTION_NOTIFICATIONS,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: Uuid,
    pub collection: Collection,
    pub account_key: String,
    pub recorded_at: DateTime<Utc>,
    pub body: serde_json::Value,
}

impl StoredDocument {
    pub fn new(
        collection: Collection,
        account_key: impl Into<String>,
        recorded_at: DateTime<Utc>,
        body: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            collection,
            account_key: account_key.into(),
            recorded_at,
            body,
        }
    }

    /// Serialize `value` as the document body.
    pub fn from_serializable<T: Serialize>(
        collection: Collection,
        account_key: impl Into<String>,
        recorded_at: DateTime<Utc>,
        value: &T,
    ) -> Result<Self, StoreError> {
        let body = serde_json::to_value(value)?;
        Ok(Self::new(collection, account_key, recorded_at, body))
    }

    /// Deserialize the body back into a typed value.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(self.body.clone())?)
    }
}

/// Query over one collection. Results are newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentFilter {
    pub account_key: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl DocumentFilter {
    pub fn for_account(account_key: impl Into<String>) -> Self {
        Self {
            account_key: Some(account_key.into()),
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn matches(&self, doc: &StoredDocument) -> bool {
        self.account_key
            .as_deref()
            .map_or(true, |key| doc.account_key == key)
            && self.since.map_or(true, |t| doc.recorded_at >= t)
            && self.until.map_or(true, |t| doc.recorded_at <= t)
    }
}
