//! Per-account scan latency samples with cached statistics.
//!
//! Samples live in memory (capped per account) and are mirrored best-effort
//! to the `scan_samples` collection. Metrics are recomputed lazily and cached
//! for `cache_ttl`; recording a sample invalidates that account's entry.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use fleetwatch_core::clock::SharedClock;
use fleetwatch_core::diagnostics::ScanSnapshot;
use fleetwatch_core::latency::{compute_metrics, AccountMetrics, LatencyConfig, ScanSample};
use fleetwatch_core::types::{AccountId, Timestamp};
use fleetwatch_db::{Collection, DocumentFilter, SharedStore};

use crate::persist::persist_best_effort;

#[derive(Debug, Default)]
struct SampleState {
    samples: HashMap<AccountId, VecDeque<ScanSample>>,
    cache: HashMap<AccountId, (AccountMetrics, Timestamp)>,
}

pub struct LatencySampleStore {
    config: LatencyConfig,
    clock: SharedClock,
    store: Option<SharedStore>,
    state: Mutex<SampleState>,
}

impl LatencySampleStore {
    pub fn new(config: LatencyConfig, clock: SharedClock, store: Option<SharedStore>) -> Self {
        Self {
            config,
            clock,
            store,
            state: Mutex::new(SampleState::default()),
        }
    }

    pub fn config(&self) -> &LatencyConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, SampleState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Record one scan duration. Invalid input is logged and ignored; a
    /// persistence failure is logged and does not undo the in-memory write.
    /// Returns whether the sample was accepted.
    pub async fn record_sample(&self, account_id: &str, duration_ms: i64) -> bool {
        if account_id.trim().is_empty() {
            tracing::warn!(duration_ms, "Rejected scan sample with empty account id");
            return false;
        }
        if duration_ms < 0 {
            tracing::warn!(account_id, duration_ms, "Rejected negative scan duration");
            return false;
        }

        let sample = ScanSample {
            account_id: account_id.to_string(),
            duration_ms: duration_ms as u64,
            timestamp: self.clock.now(),
        };

        {
            let mut state = self.lock();
            let samples = state.samples.entry(sample.account_id.clone()).or_default();
            samples.push_back(sample.clone());
            while samples.len() > self.config.max_samples_per_account {
                samples.pop_front();
            }
            state.cache.remove(account_id);
        }

        persist_best_effort(
            self.store.as_ref(),
            Collection::ScanSamples,
            &sample.account_id,
            sample.timestamp,
            &sample,
        )
        .await;
        true
    }

    /// Metrics for one account, from cache when fresh.
    pub fn get_metrics(&self, account_id: &str) -> AccountMetrics {
        let now = self.clock.now();
        let mut state = self.lock();

        if let Some((metrics, computed_at)) = state.cache.get(account_id) {
            if now - *computed_at < self.config.cache_ttl() {
                return metrics.clone();
            }
        }

        let cutoff = now - self.config.retention();
        let durations: Vec<u64> = state
            .samples
            .get(account_id)
            .map(|samples| {
                samples
                    .iter()
                    .filter(|s| s.timestamp >= cutoff)
                    .map(|s| s.duration_ms)
                    .collect()
            })
            .unwrap_or_default();

        let metrics = compute_metrics(&durations, &self.config, now);
        state
            .cache
            .insert(account_id.to_string(), (metrics.clone(), now));
        metrics
    }

    /// Metrics for every account that has samples.
    pub fn bulk_metrics(&self) -> BTreeMap<AccountId, AccountMetrics> {
        self.known_accounts()
            .into_iter()
            .map(|account| {
                let metrics = self.get_metrics(&account);
                (account, metrics)
            })
            .collect()
    }

    /// The account's recommended timeout, or the configured default while
    /// data is insufficient.
    pub fn recommended_timeout(&self, account_id: &str) -> u64 {
        self.get_metrics(account_id)
            .stats()
            .map_or(self.config.default_timeout_ms, |s| s.recommended_timeout_ms)
    }

    /// Mean and p95 for the slow-scan rule, when enough data exists.
    pub fn scan_snapshot(&self, account_id: &str) -> Option<ScanSnapshot> {
        self.get_metrics(account_id).stats().map(|s| ScanSnapshot {
            mean_ms: s.average_ms,
            p95_ms: s.p95_ms,
        })
    }

    pub fn known_accounts(&self) -> Vec<AccountId> {
        let mut accounts: Vec<AccountId> = self.lock().samples.keys().cloned().collect();
        accounts.sort();
        accounts
    }

    pub fn total_samples(&self) -> usize {
        self.lock().samples.values().map(VecDeque::len).sum()
    }

    /// Drop samples past retention, and accounts left without samples.
    /// Returns the number of in-memory samples deleted; calling it again
    /// immediately returns 0.
    pub async fn cleanup(&self) -> usize {
        let cutoff = self.clock.now() - self.config.retention();
        let deleted = {
            let mut state = self.lock();
            let mut deleted = 0;
            for samples in state.samples.values_mut() {
                let before = samples.len();
                samples.retain(|s| s.timestamp >= cutoff);
                deleted += before - samples.len();
            }
            let emptied: Vec<AccountId> = state
                .samples
                .iter()
                .filter(|(_, s)| s.is_empty())
                .map(|(a, _)| a.clone())
                .collect();
            for account in &emptied {
                state.samples.remove(account);
                state.cache.remove(account);
            }
            if deleted > 0 {
                // Cached stats may include deleted samples.
                state.cache.clear();
            }
            deleted
        };

        if let Some(store) = &self.store {
            match store.delete_older_than(Collection::ScanSamples, cutoff).await {
                Ok(rows) => tracing::debug!(rows, "Expired scan samples deleted from store"),
                Err(e) => tracing::warn!(error = %e, "Failed to delete expired scan samples"),
            }
        }

        if deleted > 0 {
            tracing::info!(deleted, "Scan sample cleanup complete");
        }
        deleted
    }

    /// Reload samples within retention from the store, e.g. after a restart.
    /// Returns the number loaded.
    pub async fn warm_from_store(&self) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };
        let cutoff = self.clock.now() - self.config.retention();
        let filter = DocumentFilter::default().with_since(cutoff);
        let docs = match store.find(Collection::ScanSamples, &filter).await {
            Ok(docs) => docs,
            Err(e) => {
                tracing::warn!(error = %e, "Could not load scan samples from store");
                return 0;
            }
        };

        let mut state = self.lock();
        let mut loaded = 0;
        // Newest first from the store; insert oldest first.
        for doc in docs.iter().rev() {
            match doc.decode::<ScanSample>() {
                Ok(sample) => {
                    let samples = state.samples.entry(sample.account_id.clone()).or_default();
                    samples.push_back(sample);
                    while samples.len() > self.config.max_samples_per_account {
                        samples.pop_front();
                    }
                    loaded += 1;
                }
                Err(e) => tracing::warn!(id = %doc.id, error = %e, "Skipping undecodable scan sample"),
            }
        }
        state.cache.clear();
        loaded
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use chrono::Duration;
    use fleetwatch_core::clock::ManualClock;
    use fleetwatch_db::{DocumentStore, MemoryStore};

    use super::*;

    fn store_with(config: LatencyConfig) -> (LatencySampleStore, Arc<ManualClock>) {
        let clock = ManualClock::starting_now();
        (LatencySampleStore::new(config, clock.clone(), None), clock)
    }

    #[tokio::test]
    async fn forty_identical_samples_have_exact_stats() {
        let (store, _) = store_with(LatencyConfig::default());
        for _ in 0..40 {
            assert!(store.record_sample("A", 10_000).await);
        }
        let metrics = store.get_metrics("A");
        let stats = metrics.stats().unwrap();
        assert_eq!(stats.average_ms, 10_000.0);
        assert_eq!(stats.p95_ms, 10_000.0);
        assert_eq!(stats.recommended_timeout_ms, 30_000);
    }

    #[tokio::test]
    async fn invalid_samples_are_ignored() {
        let (store, _) = store_with(LatencyConfig::default());
        assert!(!store.record_sample("", 1_000).await);
        assert!(!store.record_sample("A", -5).await);
        assert_eq!(store.total_samples(), 0);
        assert!(store.known_accounts().is_empty());
    }

    #[tokio::test]
    async fn below_minimum_reports_insufficient() {
        let (store, _) = store_with(LatencyConfig::default());
        for _ in 0..9 {
            store.record_sample("A", 1_000).await;
        }
        assert_matches!(store.get_metrics("A"), AccountMetrics::Insufficient { sample_count: 9 });
        assert_eq!(store.recommended_timeout("A"), 60_000);
        assert!(store.scan_snapshot("A").is_none());
    }

    #[tokio::test]
    async fn new_sample_invalidates_cache() {
        let (store, _) = store_with(LatencyConfig::default());
        for _ in 0..10 {
            store.record_sample("A", 10_000).await;
        }
        assert_eq!(store.get_metrics("A").sample_count(), 10);
        store.record_sample("A", 10_000).await;
        assert_eq!(store.get_metrics("A").sample_count(), 11);
    }

    #[tokio::test]
    async fn samples_are_capped_per_account() {
        let config = LatencyConfig {
            max_samples_per_account: 20,
            ..LatencyConfig::default()
        };
        let (store, _) = store_with(config);
        for i in 0..25 {
            store.record_sample("A", i * 1_000).await;
        }
        assert_eq!(store.total_samples(), 20);
        let stats = store.get_metrics("A");
        assert_eq!(stats.stats().unwrap().min_ms, 5_000);
    }

    #[tokio::test]
    async fn cleanup_is_idempotent() {
        let (store, clock) = store_with(LatencyConfig::default());
        for _ in 0..12 {
            store.record_sample("A", 2_000).await;
        }
        clock.advance(Duration::days(8));
        store.record_sample("B", 2_000).await;

        assert_eq!(store.cleanup().await, 12);
        assert_eq!(store.cleanup().await, 0);
        assert_eq!(store.known_accounts(), vec!["B".to_string()]);
        assert_matches!(store.get_metrics("A"), AccountMetrics::Insufficient { sample_count: 0 });
    }

    #[tokio::test]
    async fn samples_are_mirrored_and_reloaded() {
        let backing = Arc::new(MemoryStore::new());
        let clock = ManualClock::starting_now();
        let shared: SharedStore = backing.clone();
        let first = LatencySampleStore::new(LatencyConfig::default(), clock.clone(), Some(shared.clone()));
        for _ in 0..10 {
            first.record_sample("A", 3_000).await;
        }
        assert_eq!(backing.count(Collection::ScanSamples).await, 10);

        let restarted = LatencySampleStore::new(LatencyConfig::default(), clock, Some(shared));
        assert_eq!(restarted.warm_from_store().await, 10);
        assert!(restarted.get_metrics("A").has_enough_data());
    }

    #[tokio::test]
    async fn store_outage_does_not_lose_samples() {
        let backing = Arc::new(MemoryStore::new());
        backing.set_available(false);
        let clock = ManualClock::starting_now();
        let shared: SharedStore = backing.clone();
        let store = LatencySampleStore::new(LatencyConfig::default(), clock, Some(shared));

        assert!(store.record_sample("A", 3_000).await);
        assert_eq!(store.total_samples(), 1);
        assert_eq!(store.cleanup().await, 0);
        backing.set_available(true);
        assert!(backing.health_check().await.is_ok());
    }
}
