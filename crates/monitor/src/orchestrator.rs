//! The monitoring pipeline: ingress, recurring cycles and published views.
//!
//! Four named cycles run on the [`Scheduler`]:
//!
//! | Task                  | Default | Work                                              |
//! |-----------------------|---------|---------------------------------------------------|
//! | `health_check`        | 60 s    | score every account, diagnose drops, alert        |
//! | `metrics_aggregation` | 300 s   | retention cleanup, system-wide aggregates         |
//! | `dashboard_update`    | 5 s     | rebuild the [`DashboardSnapshot`]                 |
//! | `aggregation_flush`   | 60 s    | deliver queued notification aggregations; runs at |
//! |                       |         | the aggregation window when one is configured     |
//!
//! Each cycle has its own [`CycleGuard`]; a tick that finds its cycle still
//! running is skipped. Cycles can also be invoked directly.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::json;

use fleetwatch_core::channels::Channel;
use fleetwatch_core::clock::SharedClock;
use fleetwatch_core::config::MonitorConfig;
use fleetwatch_core::dashboard::{
    AccountDetail, AccountSummary, Availability, DashboardSnapshot, DiagnosticSummary,
    HealthSummary, SystemStats,
};
use fleetwatch_core::diagnostics::{recommendation_for, DiagnosticIssue};
use fleetwatch_core::error::CoreError;
use fleetwatch_core::health::HealthReport;
use fleetwatch_core::latency::LatencyStats;
use fleetwatch_core::notification::{
    HistoryFilter, NotificationRecord, NotificationRequest, NotificationStatistics, Priority,
};
use fleetwatch_core::types::AccountId;
use fleetwatch_db::{Collection, SharedStore};
use fleetwatch_events::templates::{TEMPLATE_DIAGNOSTIC_ISSUE, TEMPLATE_HEALTH_ALERT};
use fleetwatch_events::NotificationDispatcher;

use crate::activity::ActivityTracker;
use crate::diagnostics_engine::DiagnosticsEngine;
use crate::event_log::{EventLog, IngressEvent};
use crate::health_scorer::{needs_diagnostics, score_dropped, HealthScorer};
use crate::latency_store::LatencySampleStore;
use crate::registry::AccountRegistry;
use crate::scheduler::{CycleGuard, RecurringTask, Scheduler};

/// Collections expired by the metrics-aggregation cycle. Scan samples are
/// handled by the latency store's own cleanup.
const EXPIRED_COLLECTIONS: [Collection; 3] = [
    Collection::HealthReports,
    Collection::Diagnostics,
    Collection::Notifications,
];

#[derive(Debug, Default)]
struct CycleGuards {
    health_check: CycleGuard,
    metrics_aggregation: CycleGuard,
    dashboard_update: CycleGuard,
    aggregation_flush: CycleGuard,
}

pub struct Orchestrator {
    config: MonitorConfig,
    clock: SharedClock,
    registry: Arc<dyn AccountRegistry>,
    dispatcher: Arc<NotificationDispatcher>,
    store: Option<SharedStore>,
    latency: LatencySampleStore,
    health: HealthScorer,
    diagnostics: DiagnosticsEngine,
    activity: ActivityTracker,
    events: EventLog,
    scheduler: Scheduler,
    guards: CycleGuards,
    snapshot: RwLock<DashboardSnapshot>,
    stats: Mutex<SystemStats>,
}

impl Orchestrator {
    /// Validate `config` and wire the pipeline. Fails fast on a bad
    /// configuration so the host never starts half-configured.
    pub fn new(
        config: MonitorConfig,
        registry: Arc<dyn AccountRegistry>,
        dispatcher: Arc<NotificationDispatcher>,
        store: Option<SharedStore>,
        clock: SharedClock,
    ) -> Result<Arc<Self>, CoreError> {
        config.validate()?;

        let latency = LatencySampleStore::new(config.latency.clone(), clock.clone(), store.clone());
        let health = HealthScorer::new(config.health.clone(), clock.clone(), store.clone());
        let diagnostics = DiagnosticsEngine::new(config.diagnostics.clone(), store.clone());
        let activity = ActivityTracker::new(config.activity_window(), clock.clone());
        let events = EventLog::new(config.scheduler.event_log_capacity);
        let snapshot = DashboardSnapshot::empty(clock.now());

        Ok(Arc::new(Self {
            config,
            clock,
            registry,
            dispatcher,
            store,
            latency,
            health,
            diagnostics,
            activity,
            events,
            scheduler: Scheduler::new(),
            guards: CycleGuards::default(),
            snapshot: RwLock::new(snapshot),
            stats: Mutex::new(SystemStats::default()),
        }))
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.dispatcher
    }

    // -----------------------------------------------------------------------
    // Ingress
    // -----------------------------------------------------------------------

    /// Record one linking-code scan. A scan at or above the account's
    /// current recommended timeout counts as a timeout (a regeneration).
    /// Returns whether the sample was accepted.
    pub async fn record_qr_scan(&self, account_id: &str, duration_ms: i64) -> bool {
        let timeout_ms = self.latency.recommended_timeout(account_id);
        if !self.latency.record_sample(account_id, duration_ms).await {
            return false;
        }

        let duration_ms = duration_ms as u64;
        let timed_out = duration_ms >= timeout_ms;
        self.activity.record_scan(account_id, timed_out);
        self.events.push(IngressEvent {
            account_id: account_id.to_string(),
            duration_ms,
            timestamp: self.clock.now(),
            timed_out,
        });
        if timed_out {
            tracing::debug!(account_id, duration_ms, timeout_ms, "Scan exceeded recommended timeout");
        }
        true
    }

    pub fn record_connection_state(&self, account_id: &str, connected: bool) -> bool {
        if !valid_account(account_id) {
            return false;
        }
        self.activity.record_connection_state(account_id, connected);
        true
    }

    pub fn record_message_outcome(
        &self,
        account_id: &str,
        success: bool,
        response_time_ms: Option<u64>,
    ) -> bool {
        if !valid_account(account_id) {
            return false;
        }
        self.activity.record_message(account_id, success, response_time_ms);
        true
    }

    pub fn record_error(&self, account_id: &str) -> bool {
        if !valid_account(account_id) {
            return false;
        }
        self.activity.record_error(account_id);
        true
    }

    pub fn record_lock_failure(&self, account_id: &str) -> bool {
        if !valid_account(account_id) {
            return false;
        }
        self.activity.record_lock_failure(account_id);
        true
    }

    // -----------------------------------------------------------------------
    // Cycles
    // -----------------------------------------------------------------------

    /// Score every monitored account; run diagnostics where the score
    /// dropped sharply, fell below fair, the session went quiet or the last
    /// diagnosis still lists issues; alert on HIGH and CRITICAL issues.
    /// Returns `false` if a run was in progress.
    pub async fn run_health_check_cycle(&self) -> bool {
        let Some(_token) = self.guards.health_check.try_enter() else {
            tracing::debug!(cycle = "health_check", "Cycle still running, tick skipped");
            return false;
        };

        let accounts = self.monitored_accounts().await;
        let mut alerts_failed = 0;
        for account_id in &accounts {
            alerts_failed += self.check_account(account_id).await;
        }
        tracing::debug!(accounts = accounts.len(), alerts_failed, "Health check cycle complete");
        true
    }

    /// Expire old data and recompute the system-wide aggregates.
    pub async fn run_metrics_aggregation_cycle(&self) -> bool {
        let Some(_token) = self.guards.metrics_aggregation.try_enter() else {
            tracing::debug!(cycle = "metrics_aggregation", "Cycle still running, tick skipped");
            return false;
        };

        let deleted = self.latency.cleanup().await;
        let pruned = self.activity.prune(self.activity_retention());
        self.expire_documents().await;

        let bulk = self.latency.bulk_metrics();
        let ready: Vec<&LatencyStats> = bulk.values().filter_map(|m| m.stats()).collect();
        let notifications = self.dispatcher.statistics(&HistoryFilter::default());

        let stats = SystemStats {
            accounts_with_data: bulk.len(),
            total_samples: self.latency.total_samples(),
            average_latency_ms: mean(ready.iter().map(|s| s.average_ms)),
            average_recommended_timeout_ms: mean(
                ready.iter().map(|s| s.recommended_timeout_ms as f64),
            ),
            system_health: self.health.system_health(),
            samples_deleted_last_cleanup: deleted,
            notifications_sent: notifications.channels.values().map(|c| c.sent).sum(),
            notifications_failed: notifications.channels.values().map(|c| c.failed).sum(),
            computed_at: Some(self.clock.now()),
        };

        tracing::info!(
            accounts_with_data = stats.accounts_with_data,
            samples_deleted = deleted,
            activity_events_pruned = pruned,
            system_health = stats.system_health,
            "Metrics aggregation complete"
        );
        *self.stats.lock().unwrap_or_else(|p| p.into_inner()) = stats;
        true
    }

    /// Rebuild the published dashboard snapshot.
    pub async fn run_dashboard_update_cycle(&self) -> bool {
        let Some(_token) = self.guards.dashboard_update.try_enter() else {
            tracing::debug!(cycle = "dashboard_update", "Cycle still running, tick skipped");
            return false;
        };

        let accounts: Vec<AccountSummary> = self
            .monitored_accounts()
            .await
            .iter()
            .map(|account_id| self.summarize(account_id))
            .collect();

        let snapshot = DashboardSnapshot {
            timestamp: self.clock.now(),
            is_running: self.is_running(),
            total_accounts: accounts.len(),
            healthy_accounts: accounts.iter().filter(|a| a.is_healthy).count(),
            issues_count: accounts
                .iter()
                .filter_map(|a| a.diagnostics.as_ref())
                .map(|d| d.issue_count)
                .sum(),
            accounts,
            stats: self.stats.lock().unwrap_or_else(|p| p.into_inner()).clone(),
        };
        *self.snapshot.write().unwrap_or_else(|p| p.into_inner()) = snapshot;
        true
    }

    /// Deliver every queued notification aggregation.
    pub async fn run_aggregation_flush_cycle(&self) -> bool {
        let Some(_token) = self.guards.aggregation_flush.try_enter() else {
            tracing::debug!(cycle = "aggregation_flush", "Cycle still running, tick skipped");
            return false;
        };

        let flushed = self.dispatcher.flush_aggregations().await;
        if flushed > 0 {
            tracing::info!(flushed, "Aggregated notifications delivered");
        }
        true
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// The latest dashboard snapshot, with the current running state.
    pub fn dashboard_state(&self) -> DashboardSnapshot {
        let mut snapshot = self
            .snapshot
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        snapshot.is_running = self.is_running();
        snapshot
    }

    /// Merged latency, health and diagnostics view of one account.
    pub fn account_metrics(&self, account_id: &str) -> Result<AccountDetail, CoreError> {
        let latency = self.latency.get_metrics(account_id);
        let health = self.health.latest(account_id);
        let diagnostics = self.diagnostics.latest(account_id);
        let last_activity = self.activity.last_activity(account_id);

        if latency.sample_count() == 0
            && health.is_none()
            && diagnostics.is_none()
            && last_activity.is_none()
        {
            return Err(CoreError::NotFound {
                entity: "Account",
                id: account_id.to_string(),
            });
        }

        Ok(AccountDetail {
            account_id: account_id.to_string(),
            recommended_timeout_ms: latency
                .stats()
                .map_or(self.config.latency.default_timeout_ms, |s| s.recommended_timeout_ms),
            latency,
            health: health.into(),
            diagnostics: diagnostics.into(),
            last_activity,
        })
    }

    /// Latency statistics, or `InsufficientData` while too few samples exist.
    pub fn latency_stats(&self, account_id: &str) -> Result<LatencyStats, CoreError> {
        self.latency
            .get_metrics(account_id)
            .require(account_id, self.config.latency.minimum_data_points)
            .cloned()
    }

    /// Up to `limit` recent scans, newest first.
    pub fn event_history(&self, limit: usize) -> Vec<IngressEvent> {
        self.events.recent(limit)
    }

    pub fn notification_history(&self, filter: &HistoryFilter) -> Vec<NotificationRecord> {
        self.dispatcher.history(filter)
    }

    pub fn notification_statistics(&self, filter: &HistoryFilter) -> NotificationStatistics {
        self.dispatcher.statistics(filter)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Start the recurring cycles. Returns `false` if already running or
    /// if the orchestrator has been stopped; a stopped orchestrator cannot
    /// be restarted because its dispatcher is shut down.
    pub fn start(self: &Arc<Self>) -> bool {
        if self.dispatcher.is_shut_down() {
            tracing::warn!("Orchestrator was stopped and cannot be restarted");
            return false;
        }

        let sched = &self.config.scheduler;
        let tasks = vec![
            self.task("health_check", sched.health_check_interval(), |o| {
                async move {
                    o.run_health_check_cycle().await;
                }
                .boxed()
            }),
            self.task("metrics_aggregation", sched.metrics_aggregation_interval(), |o| {
                async move {
                    o.run_metrics_aggregation_cycle().await;
                }
                .boxed()
            }),
            self.task("dashboard_update", sched.dashboard_update_interval(), |o| {
                async move {
                    o.run_dashboard_update_cycle().await;
                }
                .boxed()
            }),
            self.task("aggregation_flush", self.config.notifications.flush_interval(), |o| {
                async move {
                    o.run_aggregation_flush_cycle().await;
                }
                .boxed()
            }),
        ];

        let started = self.scheduler.start(tasks);
        if started {
            tracing::info!("Orchestrator started");
        }
        started
    }

    /// Shut down the dispatcher, then cancel every cycle. Idempotent.
    ///
    /// The dispatcher goes first so a cycle waiting out a retry backoff
    /// returns at once instead of holding up the scheduler.
    pub async fn stop(&self) {
        let first = !self.dispatcher.is_shut_down();
        if first {
            self.dispatcher.shutdown();
        }
        self.scheduler.stop().await;
        if first {
            tracing::info!("Orchestrator stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Reload retained scan samples from the store after a restart.
    pub async fn restore(&self) -> usize {
        let loaded = self.latency.warm_from_store().await;
        if loaded > 0 {
            tracing::info!(loaded, "Scan samples restored from store");
        }
        loaded
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Build a task that holds only a weak reference, so a dropped
    /// orchestrator does not keep its own timers alive.
    fn task<F>(self: &Arc<Self>, name: &'static str, interval: Duration, run: F) -> RecurringTask
    where
        F: Fn(Arc<Self>) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let weak = Arc::downgrade(self);
        RecurringTask::new(name, interval, move || match weak.upgrade() {
            Some(orchestrator) => run(orchestrator),
            None => futures::future::ready(()).boxed(),
        })
    }

    /// Registry accounts plus every account that has reported scans or any
    /// other activity signal.
    async fn monitored_accounts(&self) -> Vec<AccountId> {
        let mut accounts: BTreeSet<AccountId> = self.latency.known_accounts().into_iter().collect();
        accounts.extend(self.activity.known_accounts());
        match self.registry.active_accounts().await {
            Ok(active) => accounts.extend(active),
            Err(e) => tracing::warn!(error = %e, "Account registry unavailable, using known accounts"),
        }
        accounts.into_iter().collect()
    }

    /// Score one account and alert on what it finds. Returns how many alerts
    /// could not be dispatched; a failed alert never stops the rest.
    async fn check_account(&self, account_id: &str) -> usize {
        let previous = self.health.latest(account_id).map(|r| r.overall_score);
        let inputs = self.activity.health_inputs(account_id);
        let report = self.health.calculate(account_id, inputs).await;
        let drop_threshold = self.config.health.alert_drop_threshold;
        let mut failed = 0;

        if score_dropped(previous, report.overall_score, drop_threshold) {
            if let Err(e) = self.alert_health_drop(&report).await {
                tracing::error!(account_id, error = %e, "Health alert dispatch failed");
                failed += 1;
            }
        }

        // An open diagnosis is re-run until it clears, so a recovered
        // account does not keep reporting its old issues.
        let unresolved = self
            .diagnostics
            .latest(account_id)
            .is_some_and(|d| !d.issues.is_empty());
        if !needs_diagnostics(previous, report.overall_score, drop_threshold)
            && !unresolved
            && !self.is_stale(account_id)
        {
            return failed;
        }

        let ctx = self.activity.diagnostic_context(
            account_id,
            self.latency.scan_snapshot(account_id),
            self.diagnostics.config(),
        );
        let diagnosis = self.diagnostics.run(&ctx).await;
        for issue in diagnosis.alerting_issues() {
            if let Err(e) = self.alert(account_id, issue).await {
                tracing::error!(
                    account_id,
                    issue_type = issue.issue_type.as_str(),
                    error = %e,
                    "Diagnostic alert dispatch failed"
                );
                failed += 1;
            }
        }
        failed
    }

    /// Whether the account has been idle past the stale-session threshold.
    fn is_stale(&self, account_id: &str) -> bool {
        let rule = &self.config.diagnostics.stale_session;
        rule.enabled
            && self.activity.last_activity(account_id).is_some_and(|last| {
                (self.clock.now() - last).num_seconds() as f64 > rule.threshold
            })
    }

    /// Registered channels, or in-app when nothing else is configured.
    fn alert_channels(&self) -> Vec<Channel> {
        let mut channels = self.dispatcher.registered_channels();
        if channels.is_empty() {
            channels.push(Channel::InApp);
        }
        channels
    }

    async fn alert_health_drop(&self, report: &HealthReport) -> Result<(), CoreError> {
        let account_id = report.account_id.as_str();
        let request = NotificationRequest::new("health.score_drop", account_id)
            .with_channels(self.alert_channels())
            .with_priority(Priority::High)
            .with_template(TEMPLATE_HEALTH_ALERT)
            .with_data(json!({
                "account_id": account_id,
                "score": report.overall_score,
                "rating": report.rating.as_str(),
                "change": report.trend.change,
            }));

        let outcome = self.dispatcher.send(request).await?;
        tracing::info!(
            account_id,
            score = report.overall_score,
            change = report.trend.change,
            status = ?outcome.status(),
            "Health drop alert dispatched"
        );
        Ok(())
    }

    async fn alert(&self, account_id: &str, issue: &DiagnosticIssue) -> Result<(), CoreError> {
        let channels = self.alert_channels();
        let recommendation = recommendation_for(issue.issue_type);
        let request = NotificationRequest::new(
            format!("diagnostic.{}", issue.issue_type.as_str()),
            account_id,
        )
        .with_channels(channels)
        .with_priority(Priority::from(issue.severity))
        .with_template(TEMPLATE_DIAGNOSTIC_ISSUE)
        .with_data(json!({
            "account_id": account_id,
            "issue_type": issue.issue_type.as_str(),
            "severity": issue.severity.as_str(),
            "description": issue.description,
            "observed_value": issue.observed_value,
            "threshold": issue.threshold,
            "action": recommendation.action,
        }));

        let outcome = self.dispatcher.send(request).await?;
        tracing::info!(
            account_id,
            issue_type = issue.issue_type.as_str(),
            severity = issue.severity.as_str(),
            status = ?outcome.status(),
            "Diagnostic alert dispatched"
        );
        Ok(())
    }

    fn summarize(&self, account_id: &str) -> AccountSummary {
        let latency = Availability::from(&self.latency.get_metrics(account_id));
        let health: Availability<HealthSummary> =
            self.health.latest(account_id).as_ref().map(HealthSummary::from).into();
        let diagnostics: Availability<DiagnosticSummary> = self
            .diagnostics
            .latest(account_id)
            .as_ref()
            .map(DiagnosticSummary::from)
            .into();
        let is_healthy = AccountSummary::compute_is_healthy(&health, &diagnostics);
        AccountSummary {
            account_id: account_id.to_string(),
            latency,
            health,
            diagnostics,
            last_activity: self.activity.last_activity(account_id),
            is_healthy,
        }
    }

    /// Activity is kept long enough for the widest window that reads it.
    fn activity_retention(&self) -> chrono::Duration {
        let diag = &self.config.diagnostics;
        [
            self.activity.window(),
            diag.frequent_regeneration.window(),
            diag.network_issue.window(),
            diag.lock_contention.window(),
        ]
        .into_iter()
        .max()
        .unwrap_or_else(|| self.activity.window())
    }

    async fn expire_documents(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let cutoff = self.clock.now() - self.config.latency.retention();
        for collection in EXPIRED_COLLECTIONS {
            match store.delete_older_than(collection, cutoff).await {
                Ok(0) => {}
                Ok(rows) => tracing::info!(collection = %collection, rows, "Expired documents deleted"),
                Err(e) => tracing::warn!(collection = %collection, error = %e, "Document expiry failed"),
            }
        }
    }
}

fn valid_account(account_id: &str) -> bool {
    if account_id.trim().is_empty() {
        tracing::warn!("Rejected activity signal with empty account id");
        return false;
    }
    true
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}
