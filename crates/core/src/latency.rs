//! Scan latency statistics and adaptive timeout calculation.
//!
//! Given the durations of an account's recent linking scans, computes the
//! distribution summary and a recommended scan timeout clamped to a
//! configured range.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::threshold_validation::{validate_min_max, validate_positive};
use crate::types::{AccountId, Timestamp};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One measured linking/handshake duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSample {
    pub account_id: AccountId,
    pub duration_ms: u64,
    pub timestamp: Timestamp,
}

/// Tuning for the latency statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyConfig {
    /// Samples required before statistics are reported.
    pub minimum_data_points: usize,
    /// Sample count at which confidence reaches 1.0.
    pub target_sample_count: usize,
    /// Added on top of p95 when recommending a timeout.
    pub buffer_time_ms: u64,
    pub min_timeout_ms: u64,
    pub max_timeout_ms: u64,
    /// Timeout used for accounts without enough data.
    pub default_timeout_ms: u64,
    /// Average above which an account is flagged slow.
    pub slow_threshold_ms: f64,
    /// Coefficient of variation below which an account is flagged consistent.
    pub consistency_threshold: f64,
    /// Samples older than this are discarded.
    pub retention_secs: u64,
    /// How long computed metrics stay fresh in the cache.
    pub cache_ttl_secs: u64,
    /// In-memory cap per account; the oldest samples are evicted first.
    pub max_samples_per_account: usize,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            minimum_data_points: 10,
            target_sample_count: 100,
            buffer_time_ms: 5_000,
            min_timeout_ms: 30_000,
            max_timeout_ms: 120_000,
            default_timeout_ms: 60_000,
            slow_threshold_ms: 30_000.0,
            consistency_threshold: 0.3,
            retention_secs: 7 * 24 * 3600,
            cache_ttl_secs: 300,
            max_samples_per_account: 1_000,
        }
    }
}

impl LatencyConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.minimum_data_points == 0 {
            return Err(CoreError::Configuration(
                "minimum_data_points must be at least 1".to_string(),
            ));
        }
        if self.target_sample_count < self.minimum_data_points {
            return Err(CoreError::Configuration(format!(
                "target_sample_count ({}) must be >= minimum_data_points ({})",
                self.target_sample_count, self.minimum_data_points
            )));
        }
        if self.max_samples_per_account < self.minimum_data_points {
            return Err(CoreError::Configuration(
                "max_samples_per_account must be >= minimum_data_points".to_string(),
            ));
        }
        validate_min_max(
            self.min_timeout_ms as f64,
            self.max_timeout_ms as f64,
            "scan timeout",
        )?;
        validate_positive(self.slow_threshold_ms, "slow_threshold_ms")?;
        validate_positive(self.consistency_threshold, "consistency_threshold")?;
        validate_positive(self.retention_secs as f64, "retention_secs")
    }

    pub fn clamp_timeout(&self, timeout_ms: u64) -> u64 {
        timeout_ms.clamp(self.min_timeout_ms, self.max_timeout_ms)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retention_secs as i64)
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cache_ttl_secs as i64)
    }
}

/// Distribution summary for an account with enough samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub sample_count: usize,
    pub average_ms: f64,
    pub median_ms: f64,
    pub p95_ms: f64,
    pub std_dev_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    /// `min(1, sample_count / target_sample_count)`.
    pub confidence: f64,
    pub recommended_timeout_ms: u64,
    pub is_slow: bool,
    pub is_consistent: bool,
    pub computed_at: Timestamp,
}

/// Latency metrics for one account.
///
/// Serializes flat with a `has_enough_data` flag so consumers can render an
/// explicit "insufficient data" state.
#[derive(Debug, Clone, PartialEq)]
pub enum AccountMetrics {
    Insufficient { sample_count: usize },
    Ready(LatencyStats),
}

impl Serialize for AccountMetrics {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a> {
            has_enough_data: bool,
            #[serde(skip_serializing_if = "Option::is_none")]
            sample_count: Option<usize>,
            #[serde(flatten)]
            stats: Option<&'a LatencyStats>,
        }
        let wire = match self {
            AccountMetrics::Insufficient { sample_count } => Wire {
                has_enough_data: false,
                sample_count: Some(*sample_count),
                stats: None,
            },
            AccountMetrics::Ready(stats) => Wire {
                has_enough_data: true,
                sample_count: None,
                stats: Some(stats),
            },
        };
        wire.serialize(serializer)
    }
}

impl AccountMetrics {
    pub fn has_enough_data(&self) -> bool {
        matches!(self, AccountMetrics::Ready(_))
    }

    pub fn sample_count(&self) -> usize {
        match self {
            AccountMetrics::Insufficient { sample_count } => *sample_count,
            AccountMetrics::Ready(stats) => stats.sample_count,
        }
    }

    pub fn stats(&self) -> Option<&LatencyStats> {
        match self {
            AccountMetrics::Ready(stats) => Some(stats),
            AccountMetrics::Insufficient { .. } => None,
        }
    }

    /// Demand ready statistics, turning the insufficient case into an error.
    pub fn require(&self, account_id: &str, required: usize) -> Result<&LatencyStats, CoreError> {
        match self {
            AccountMetrics::Ready(stats) => Ok(stats),
            AccountMetrics::Insufficient { sample_count } => Err(CoreError::InsufficientData {
                account_id: account_id.to_string(),
                sample_count: *sample_count,
                required,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Nearest-rank percentile of an ascending slice. `pct` is in `(0, 100]`.
pub fn nearest_rank(sorted: &[u64], pct: f64) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (pct * sorted.len() as f64 / 100.0).ceil() as usize;
    let idx = rank.clamp(1, sorted.len()) - 1;
    Some(sorted[idx])
}

/// Median of an ascending slice (mean of the middle pair for even lengths).
pub fn median(sorted: &[u64]) -> Option<f64> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    if n % 2 == 1 {
        Some(sorted[n / 2] as f64)
    } else {
        Some((sorted[n / 2 - 1] as f64 + sorted[n / 2] as f64) / 2.0)
    }
}

/// Population standard deviation around `mean`.
pub fn std_dev(values: &[u64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let variance = values
        .iter()
        .map(|v| {
            let d = *v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / values.len() as f64;
    variance.sqrt()
}

/// Compute metrics from raw durations.
///
/// Returns [`AccountMetrics::Insufficient`] below `minimum_data_points`.
pub fn compute_metrics(durations: &[u64], config: &LatencyConfig, now: Timestamp) -> AccountMetrics {
    let sample_count = durations.len();
    if sample_count < config.minimum_data_points || sample_count == 0 {
        return AccountMetrics::Insufficient { sample_count };
    }

    let mut sorted = durations.to_vec();
    sorted.sort_unstable();

    let average_ms = sorted.iter().map(|v| *v as f64).sum::<f64>() / sample_count as f64;
    let median_ms = median(&sorted).unwrap_or(0.0);
    let p95 = nearest_rank(&sorted, 95.0).unwrap_or(0);
    let std_dev_ms = std_dev(&sorted, average_ms);
    let confidence = (sample_count as f64 / config.target_sample_count.max(1) as f64).min(1.0);
    let recommended_timeout_ms = config.clamp_timeout(p95.saturating_add(config.buffer_time_ms));

    let is_consistent = if average_ms > 0.0 {
        std_dev_ms / average_ms < config.consistency_threshold
    } else {
        true
    };

    AccountMetrics::Ready(LatencyStats {
        sample_count,
        average_ms,
        median_ms,
        p95_ms: p95 as f64,
        std_dev_ms,
        min_ms: sorted[0],
        max_ms: sorted[sample_count - 1],
        confidence,
        recommended_timeout_ms,
        is_slow: average_ms > config.slow_threshold_ms,
        is_consistent,
        computed_at: now,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn now() -> Timestamp {
        chrono::Utc::now()
    }

    #[test]
    fn forty_identical_samples() {
        let config = LatencyConfig::default();
        let durations = vec![10_000u64; 40];
        let metrics = compute_metrics(&durations, &config, now());
        let stats = metrics.stats().expect("enough data");
        assert_eq!(stats.sample_count, 40);
        assert_eq!(stats.average_ms, 10_000.0);
        assert_eq!(stats.median_ms, 10_000.0);
        assert_eq!(stats.p95_ms, 10_000.0);
        assert_eq!(stats.std_dev_ms, 0.0);
        assert_eq!(stats.confidence, 0.4);
        assert_eq!(
            stats.recommended_timeout_ms,
            config.clamp_timeout(10_000 + config.buffer_time_ms)
        );
        assert!(!stats.is_slow);
        assert!(stats.is_consistent);
    }

    #[test]
    fn below_minimum_is_insufficient() {
        let config = LatencyConfig::default();
        let metrics = compute_metrics(&[1_000; 9], &config, now());
        assert_matches!(metrics, AccountMetrics::Insufficient { sample_count: 9 });
        assert!(!metrics.has_enough_data());
        assert!(metrics.require("A", 10).is_err());
    }

    #[test]
    fn nearest_rank_percentile() {
        let sorted: Vec<u64> = (1..=20).collect();
        assert_eq!(nearest_rank(&sorted, 95.0), Some(19));
        assert_eq!(nearest_rank(&sorted, 100.0), Some(20));
        assert_eq!(nearest_rank(&sorted, 50.0), Some(10));
        assert_eq!(nearest_rank(&[], 95.0), None);
    }

    #[test]
    fn median_even_and_odd() {
        assert_eq!(median(&[1, 2, 3]), Some(2.0));
        assert_eq!(median(&[1, 2, 3, 4]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn p95_dominates_median_and_timeout_within_range() {
        let config = LatencyConfig::default();
        // Deterministic spread of skewed and uniform sets.
        let sets: Vec<Vec<u64>> = vec![
            (0..50).map(|i| i * 3_000).collect(),
            (0..10).map(|i| if i == 9 { 500_000 } else { 100 }).collect(),
            (0..200).map(|i| (i * 7919) % 90_000).collect(),
            vec![0; 12],
        ];
        for set in sets {
            let stats = compute_metrics(&set, &config, now());
            let stats = stats.stats().expect("enough data");
            assert!(stats.p95_ms >= stats.median_ms);
            assert!(stats.median_ms >= 0.0);
            assert!(stats.recommended_timeout_ms >= config.min_timeout_ms);
            assert!(stats.recommended_timeout_ms <= config.max_timeout_ms);
            assert!((0.0..=1.0).contains(&stats.confidence));
        }
    }

    #[test]
    fn slow_and_inconsistent_flags() {
        let config = LatencyConfig::default();
        let mut durations = vec![5_000u64; 10];
        durations.extend(vec![95_000u64; 10]);
        let metrics = compute_metrics(&durations, &config, now());
        let stats = metrics.stats().unwrap();
        assert_eq!(stats.average_ms, 50_000.0);
        assert!(stats.is_slow);
        assert!(!stats.is_consistent);
        assert_eq!(stats.p95_ms, 95_000.0);
        assert_eq!(stats.recommended_timeout_ms, 100_000);

        let very_slow = compute_metrics(&[200_000; 10], &config, now());
        assert_eq!(
            very_slow.stats().unwrap().recommended_timeout_ms,
            config.max_timeout_ms
        );
    }

    #[test]
    fn serializes_with_flag() {
        let json = serde_json::to_value(AccountMetrics::Insufficient { sample_count: 3 }).unwrap();
        assert_eq!(json["has_enough_data"], false);
        assert_eq!(json["sample_count"], 3);

        let ready = compute_metrics(&[10_000; 12], &LatencyConfig::default(), now());
        let json = serde_json::to_value(ready).unwrap();
        assert_eq!(json["has_enough_data"], true);
        assert_eq!(json["sample_count"], 12);
        assert_eq!(json["p95_ms"], 10_000.0);
    }

    #[test]
    fn config_validation() {
        assert!(LatencyConfig::default().validate().is_ok());
        let bad = LatencyConfig {
            min_timeout_ms: 200_000,
            ..LatencyConfig::default()
        };
        assert!(bad.validate().is_err());
        let bad = LatencyConfig {
            minimum_data_points: 0,
            ..LatencyConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
