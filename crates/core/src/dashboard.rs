//! Read-only projections published for dashboard presenters.
//!
//! Every per-account section is an [`Availability`] so a presenter always
//! gets an explicit "insufficient data" or "unavailable" state instead of a
//! missing field.

use serde::{Deserialize, Serialize};

use crate::diagnostics::{DiagnosticReport, ReportSeverity};
use crate::health::{HealthRating, HealthReport, Trend, RATING_FAIR};
use crate::latency::{AccountMetrics, LatencyStats};
use crate::types::{AccountId, Timestamp};

/// A value, or the reason it is missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum Availability<T> {
    Available(T),
    InsufficientData,
    Unavailable,
}

impl<T> Availability<T> {
    pub fn as_ref(&self) -> Option<&T> {
        match self {
            Availability::Available(v) => Some(v),
            _ => None,
        }
    }
}

impl<T> From<Option<T>> for Availability<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Availability::Unavailable, Availability::Available)
    }
}

impl From<&AccountMetrics> for Availability<LatencyStats> {
    fn from(metrics: &AccountMetrics) -> Self {
        match metrics {
            AccountMetrics::Ready(stats) => Availability::Available(stats.clone()),
            AccountMetrics::Insufficient { .. } => Availability::InsufficientData,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub overall_score: u8,
    pub rating: HealthRating,
    pub trend: Trend,
}

impl From<&HealthReport> for HealthSummary {
    fn from(r: &HealthReport) -> Self {
        Self {
            overall_score: r.overall_score,
            rating: r.rating,
            trend: r.trend,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticSummary {
    pub severity: ReportSeverity,
    pub issue_count: usize,
    pub checked_at: Timestamp,
}

impl From<&DiagnosticReport> for DiagnosticSummary {
    fn from(r: &DiagnosticReport) -> Self {
        Self {
            severity: r.severity,
            issue_count: r.issues.len(),
            checked_at: r.timestamp,
        }
    }
}

/// One row of the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub account_id: AccountId,
    pub latency: Availability<LatencyStats>,
    pub health: Availability<HealthSummary>,
    pub diagnostics: Availability<DiagnosticSummary>,
    pub last_activity: Option<Timestamp>,
    pub is_healthy: bool,
}

impl AccountSummary {
    /// Healthy means scored at least fair with no open HIGH/CRITICAL issue.
    /// Accounts never scored are not counted as healthy.
    pub fn compute_is_healthy(
        health: &Availability<HealthSummary>,
        diagnostics: &Availability<DiagnosticSummary>,
    ) -> bool {
        let scored_ok = health
            .as_ref()
            .is_some_and(|h| h.overall_score >= RATING_FAIR);
        let no_alerts = diagnostics
            .as_ref()
            .map_or(true, |d| d.severity < ReportSeverity::High);
        scored_ok && no_alerts
    }
}

/// System-wide aggregates from the metrics-aggregation cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    pub accounts_with_data: usize,
    pub total_samples: usize,
    pub average_latency_ms: Option<f64>,
    pub average_recommended_timeout_ms: Option<f64>,
    pub system_health: f64,
    pub samples_deleted_last_cleanup: usize,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
    pub computed_at: Option<Timestamp>,
}

/// The published dashboard projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub timestamp: Timestamp,
    pub is_running: bool,
    pub total_accounts: usize,
    pub healthy_accounts: usize,
    pub issues_count: usize,
    pub accounts: Vec<AccountSummary>,
    pub stats: SystemStats,
}

impl DashboardSnapshot {
    /// The snapshot published before the first dashboard cycle has run.
    pub fn empty(now: Timestamp) -> Self {
        Self {
            timestamp: now,
            is_running: false,
            total_accounts: 0,
            healthy_accounts: 0,
            issues_count: 0,
            accounts: Vec::new(),
            stats: SystemStats::default(),
        }
    }
}

/// Merged per-account view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountDetail {
    pub account_id: AccountId,
    pub latency: AccountMetrics,
    pub recommended_timeout_ms: u64,
    pub health: Availability<HealthReport>,
    pub diagnostics: Availability<DiagnosticReport>,
    pub last_activity: Option<Timestamp>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::TrendDirection;

    fn health(score: u8) -> Availability<HealthSummary> {
        Availability::Available(HealthSummary {
            overall_score: score,
            rating: HealthRating::from_score(score),
            trend: Trend {
                direction: TrendDirection::Stable,
                change: 0,
            },
        })
    }

    fn diag(severity: ReportSeverity) -> Availability<DiagnosticSummary> {
        Availability::Available(DiagnosticSummary {
            severity,
            issue_count: 1,
            checked_at: chrono::Utc::now(),
        })
    }

    #[test]
    fn healthy_requires_score_and_no_alerts() {
        assert!(AccountSummary::compute_is_healthy(&health(80), &Availability::Unavailable));
        assert!(AccountSummary::compute_is_healthy(&health(60), &diag(ReportSeverity::Medium)));
        assert!(!AccountSummary::compute_is_healthy(&health(59), &Availability::Unavailable));
        assert!(!AccountSummary::compute_is_healthy(&health(95), &diag(ReportSeverity::High)));
        assert!(!AccountSummary::compute_is_healthy(
            &Availability::InsufficientData,
            &Availability::Unavailable
        ));
    }

    #[test]
    fn availability_serializes_with_explicit_state() {
        let missing: Availability<u8> = Availability::InsufficientData;
        let json = serde_json::to_value(&missing).unwrap();
        assert_eq!(json["state"], "insufficient_data");

        let present = Availability::Available(7u8);
        let json = serde_json::to_value(&present).unwrap();
        assert_eq!(json["state"], "available");
        assert_eq!(json["value"], 7);
    }

    #[test]
    fn insufficient_metrics_map_to_insufficient_state() {
        let metrics = AccountMetrics::Insufficient { sample_count: 2 };
        let latency: Availability<LatencyStats> = (&metrics).into();
        assert_eq!(latency, Availability::InsufficientData);
    }
}
