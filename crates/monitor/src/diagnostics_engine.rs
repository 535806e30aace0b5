//! Rule-based diagnostics with per-account report history.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use fleetwatch_core::diagnostics::{diagnose, DiagnosticContext, DiagnosticReport, DiagnosticsConfig};
use fleetwatch_core::types::AccountId;
use fleetwatch_db::{Collection, SharedStore};

use crate::persist::persist_best_effort;

pub struct DiagnosticsEngine {
    config: DiagnosticsConfig,
    store: Option<SharedStore>,
    history: Mutex<HashMap<AccountId, VecDeque<DiagnosticReport>>>,
}

impl DiagnosticsEngine {
    pub fn new(config: DiagnosticsConfig, store: Option<SharedStore>) -> Self {
        Self {
            config,
            store,
            history: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &DiagnosticsConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<AccountId, VecDeque<DiagnosticReport>>> {
        self.history.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Evaluate every enabled rule against `ctx`, keep the report in the
    /// account's capped history and persist it best-effort.
    pub async fn run(&self, ctx: &DiagnosticContext) -> DiagnosticReport {
        let report = diagnose(ctx, &self.config);

        {
            let mut history = self.lock();
            let reports = history.entry(ctx.account_id.clone()).or_default();
            reports.push_back(report.clone());
            while reports.len() > self.config.history_limit {
                reports.pop_front();
            }
        }

        if report.issues.is_empty() {
            tracing::debug!(account_id = %ctx.account_id, "Diagnostics found no issues");
        } else {
            tracing::info!(
                account_id = %ctx.account_id,
                severity = ?report.severity,
                issues = report.issues.len(),
                "Diagnostics found issues"
            );
        }

        persist_best_effort(
            self.store.as_ref(),
            Collection::Diagnostics,
            &ctx.account_id,
            report.timestamp,
            &report,
        )
        .await;
        report
    }

    pub fn latest(&self, account_id: &str) -> Option<DiagnosticReport> {
        self.lock().get(account_id).and_then(|r| r.back().cloned())
    }

    /// Up to `limit` reports for the account, newest first.
    pub fn history(&self, account_id: &str, limit: usize) -> Vec<DiagnosticReport> {
        self.lock()
            .get(account_id)
            .map(|reports| reports.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }
}
