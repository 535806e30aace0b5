//! Health scoring with per-account report history.
//!
//! Scoring itself is pure (`fleetwatch_core::health`); this wrapper trends
//! each new report against the previous one, keeps a capped history per
//! account and mirrors reports to the `health_reports` collection.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use fleetwatch_core::clock::SharedClock;
use fleetwatch_core::config::HealthConfig;
use fleetwatch_core::health::{
    build_report, HealthInputs, HealthReport, NEUTRAL_SYSTEM_SCORE, RATING_FAIR,
};
use fleetwatch_core::types::AccountId;
use fleetwatch_db::{Collection, SharedStore};

use crate::persist::persist_best_effort;

/// Whether the score fell by more than `drop_threshold` points since the
/// previous report. The first report never counts as a drop.
pub fn score_dropped(previous: Option<u8>, current: u8, drop_threshold: u8) -> bool {
    previous.is_some_and(|p| i32::from(p) - i32::from(current) > i32::from(drop_threshold))
}

/// Whether a new score warrants a diagnostics run: a drop of more than
/// `drop_threshold` points since the previous report, or a score below the
/// fair band.
pub fn needs_diagnostics(previous: Option<u8>, current: u8, drop_threshold: u8) -> bool {
    score_dropped(previous, current, drop_threshold) || current < RATING_FAIR
}

pub struct HealthScorer {
    config: HealthConfig,
    clock: SharedClock,
    store: Option<SharedStore>,
    history: Mutex<HashMap<AccountId, VecDeque<HealthReport>>>,
}

impl HealthScorer {
    pub fn new(config: HealthConfig, clock: SharedClock, store: Option<SharedStore>) -> Self {
        Self {
            config,
            clock,
            store,
            history: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<AccountId, VecDeque<HealthReport>>> {
        self.history.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Score `inputs`, append the report to the account's history and
    /// persist it best-effort.
    pub async fn calculate(&self, account_id: &str, inputs: HealthInputs) -> HealthReport {
        let now = self.clock.now();
        let report = {
            let mut history = self.lock();
            let reports = history.entry(account_id.to_string()).or_default();
            let report = build_report(
                account_id,
                inputs,
                reports.back(),
                &self.config.thresholds,
                &self.config.weights,
                self.config.stable_band,
                now,
            );
            reports.push_back(report.clone());
            while reports.len() > self.config.history_limit {
                reports.pop_front();
            }
            report
        };

        tracing::debug!(
            account_id,
            score = report.overall_score,
            rating = report.rating.as_str(),
            change = report.trend.change,
            "Health report computed"
        );

        persist_best_effort(
            self.store.as_ref(),
            Collection::HealthReports,
            account_id,
            now,
            &report,
        )
        .await;
        report
    }

    pub fn latest(&self, account_id: &str) -> Option<HealthReport> {
        self.lock().get(account_id).and_then(|r| r.back().cloned())
    }

    /// Up to `limit` reports for the account, newest first.
    pub fn history(&self, account_id: &str, limit: usize) -> Vec<HealthReport> {
        self.lock()
            .get(account_id)
            .map(|reports| reports.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// Mean of every account's latest overall score; neutral when no account
    /// has been scored.
    pub fn system_health(&self) -> f64 {
        let history = self.lock();
        let latest: Vec<f64> = history
            .values()
            .filter_map(|r| r.back())
            .map(|r| f64::from(r.overall_score))
            .collect();
        if latest.is_empty() {
            return NEUTRAL_SYSTEM_SCORE;
        }
        latest.iter().sum::<f64>() / latest.len() as f64
    }
}
