//! Sliding-window activity counters per account.
//!
//! The tracker turns raw signals (scans, connection changes, message
//! outcomes, errors, lock failures) into health inputs and diagnostic
//! contexts. A dimension with no observations in the window reports its
//! optimistic value so silence alone never lowers a score; the stale-session
//! rule is what catches silence.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use fleetwatch_core::clock::SharedClock;
use fleetwatch_core::diagnostics::{DiagnosticContext, DiagnosticsConfig, ScanSnapshot};
use fleetwatch_core::health::HealthInputs;
use fleetwatch_core::types::{AccountId, Timestamp};

/// Per-kind event cap so memory stays bounded between prunes.
const MAX_EVENTS_PER_KIND: usize = 10_000;

/// Inputs reported for an account with no observations at all.
pub const OPTIMISTIC_INPUTS: HealthInputs = HealthInputs {
    uptime_ratio: 1.0,
    qr_regen_rate: 0.0,
    error_rate: 0.0,
    avg_response_time_ms: 0.0,
    message_success_rate: 1.0,
};

#[derive(Debug, Clone, Copy)]
struct MessageEvent {
    at: Timestamp,
    success: bool,
    response_time_ms: Option<u64>,
}

#[derive(Debug, Default)]
struct AccountActivity {
    /// `(at, timed_out)`
    scans: VecDeque<(Timestamp, bool)>,
    /// `(at, connected)`, one entry per state change.
    transitions: VecDeque<(Timestamp, bool)>,
    messages: VecDeque<MessageEvent>,
    errors: VecDeque<Timestamp>,
    lock_failures: VecDeque<Timestamp>,
    last_activity: Option<Timestamp>,
}

fn push_capped<T>(events: &mut VecDeque<T>, event: T) {
    events.push_back(event);
    while events.len() > MAX_EVENTS_PER_KIND {
        events.pop_front();
    }
}

fn count_since(events: &VecDeque<Timestamp>, since: Timestamp) -> u32 {
    events.iter().filter(|t| **t >= since).count() as u32
}

impl AccountActivity {
    fn touch(&mut self, at: Timestamp) {
        if self.last_activity.map_or(true, |last| at > last) {
            self.last_activity = Some(at);
        }
    }

    /// Fraction of `[window_start, now]` spent connected, counted from the
    /// first known state. `None` when nothing is known.
    fn uptime(&self, window_start: Timestamp, now: Timestamp) -> Option<f64> {
        let first = self.transitions.front()?;

        // State at the window start comes from the last transition before it.
        let mut state = self
            .transitions
            .iter()
            .take_while(|(at, _)| *at <= window_start)
            .last()
            .map(|(_, connected)| *connected);
        let mut cursor = if state.is_some() { window_start } else { first.0 };

        let mut connected_ms = 0i64;
        for &(at, connected) in self.transitions.iter().filter(|(at, _)| *at > window_start) {
            if state == Some(true) {
                connected_ms += (at - cursor).num_milliseconds();
            }
            state = Some(connected);
            cursor = at;
        }
        if state == Some(true) {
            connected_ms += (now - cursor).num_milliseconds();
        }

        let observed_ms = (now - window_start.max(first.0)).num_milliseconds();
        if observed_ms <= 0 {
            return Some(if state == Some(true) { 1.0 } else { 0.0 });
        }
        Some((connected_ms as f64 / observed_ms as f64).clamp(0.0, 1.0))
    }

    fn prune(&mut self, cutoff: Timestamp) -> usize {
        let mut removed = 0;
        removed += retain_counted(&mut self.scans, |(at, _)| *at >= cutoff);
        removed += retain_counted(&mut self.messages, |m| m.at >= cutoff);
        removed += retain_counted(&mut self.errors, |at| *at >= cutoff);
        removed += retain_counted(&mut self.lock_failures, |at| *at >= cutoff);

        // Keep the newest transition before the cutoff: it holds the state at
        // the start of the window.
        let before = self.transitions.iter().filter(|(at, _)| *at < cutoff).count();
        if before > 1 {
            self.transitions.drain(..before - 1);
            removed += before - 1;
        }
        removed
    }
}

fn retain_counted<T>(events: &mut VecDeque<T>, keep: impl FnMut(&T) -> bool) -> usize {
    let before = events.len();
    events.retain(keep);
    before - events.len()
}

pub struct ActivityTracker {
    window: chrono::Duration,
    clock: SharedClock,
    accounts: Mutex<HashMap<AccountId, AccountActivity>>,
}

impl ActivityTracker {
    pub fn new(window: chrono::Duration, clock: SharedClock) -> Self {
        Self {
            window,
            clock,
            accounts: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> chrono::Duration {
        self.window
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<AccountId, AccountActivity>> {
        self.accounts.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn with_account(&self, account_id: &str, f: impl FnOnce(&mut AccountActivity, Timestamp)) {
        let now = self.clock.now();
        let mut accounts = self.lock();
        f(accounts.entry(account_id.to_string()).or_default(), now);
    }

    // -- recorders --

    pub fn record_scan(&self, account_id: &str, timed_out: bool) {
        self.with_account(account_id, |a, now| {
            push_capped(&mut a.scans, (now, timed_out));
            a.touch(now);
        });
    }

    /// Record the current connection state. Repeats of the current state are
    /// ignored.
    pub fn record_connection_state(&self, account_id: &str, connected: bool) {
        self.with_account(account_id, |a, now| {
            if a.transitions.back().is_some_and(|(_, c)| *c == connected) {
                return;
            }
            push_capped(&mut a.transitions, (now, connected));
            if connected {
                a.touch(now);
            }
        });
    }

    pub fn record_message(&self, account_id: &str, success: bool, response_time_ms: Option<u64>) {
        self.with_account(account_id, |a, now| {
            push_capped(
                &mut a.messages,
                MessageEvent {
                    at: now,
                    success,
                    response_time_ms,
                },
            );
            a.touch(now);
        });
    }

    pub fn record_error(&self, account_id: &str) {
        self.with_account(account_id, |a, now| push_capped(&mut a.errors, now));
    }

    pub fn record_lock_failure(&self, account_id: &str) {
        self.with_account(account_id, |a, now| push_capped(&mut a.lock_failures, now));
    }

    // -- queries --

    pub fn last_activity(&self, account_id: &str) -> Option<Timestamp> {
        self.lock().get(account_id).and_then(|a| a.last_activity)
    }

    /// Health inputs over the activity window.
    pub fn health_inputs(&self, account_id: &str) -> HealthInputs {
        let now = self.clock.now();
        let since = now - self.window;
        let accounts = self.lock();
        let Some(a) = accounts.get(account_id) else {
            return OPTIMISTIC_INPUTS;
        };

        let scans: Vec<bool> = a
            .scans
            .iter()
            .filter(|(at, _)| *at >= since)
            .map(|(_, timed_out)| *timed_out)
            .collect();
        let messages: Vec<&MessageEvent> = a.messages.iter().filter(|m| m.at >= since).collect();
        let errors = count_since(&a.errors, since) as usize;

        let qr_regen_rate = if scans.is_empty() {
            OPTIMISTIC_INPUTS.qr_regen_rate
        } else {
            scans.iter().filter(|t| **t).count() as f64 / scans.len() as f64
        };

        let error_rate = match messages.len() + errors {
            0 => OPTIMISTIC_INPUTS.error_rate,
            total => errors as f64 / total as f64,
        };

        let response_times: Vec<u64> = messages.iter().filter_map(|m| m.response_time_ms).collect();
        let avg_response_time_ms = if response_times.is_empty() {
            OPTIMISTIC_INPUTS.avg_response_time_ms
        } else {
            response_times.iter().sum::<u64>() as f64 / response_times.len() as f64
        };

        let message_success_rate = if messages.is_empty() {
            OPTIMISTIC_INPUTS.message_success_rate
        } else {
            messages.iter().filter(|m| m.success).count() as f64 / messages.len() as f64
        };

        HealthInputs {
            uptime_ratio: a.uptime(since, now).unwrap_or(OPTIMISTIC_INPUTS.uptime_ratio),
            qr_regen_rate,
            error_rate,
            avg_response_time_ms,
            message_success_rate,
        }
    }

    /// Counters for the diagnostic rules, each over its own rule window.
    pub fn diagnostic_context(
        &self,
        account_id: &str,
        scan: Option<ScanSnapshot>,
        config: &DiagnosticsConfig,
    ) -> DiagnosticContext {
        let now = self.clock.now();
        let accounts = self.lock();
        let mut ctx = DiagnosticContext {
            account_id: account_id.to_string(),
            now,
            scan,
            regenerations_in_window: 0,
            errors_in_window: 0,
            operations_in_window: 0,
            lock_failures_in_window: 0,
            last_activity: None,
        };
        let Some(a) = accounts.get(account_id) else {
            return ctx;
        };

        let regen_since = now - config.frequent_regeneration.window();
        ctx.regenerations_in_window = a
            .scans
            .iter()
            .filter(|(at, timed_out)| *timed_out && *at >= regen_since)
            .count() as u32;

        let network_since = now - config.network_issue.window();
        ctx.errors_in_window = count_since(&a.errors, network_since);
        let messages = a.messages.iter().filter(|m| m.at >= network_since).count() as u32;
        ctx.operations_in_window = messages + ctx.errors_in_window;

        ctx.lock_failures_in_window =
            count_since(&a.lock_failures, now - config.lock_contention.window());
        ctx.last_activity = a.last_activity;
        ctx
    }

    /// Every account that has reported any signal, sorted.
    pub fn known_accounts(&self) -> Vec<AccountId> {
        let mut accounts: Vec<AccountId> = self.lock().keys().cloned().collect();
        accounts.sort();
        accounts
    }

    /// Drop events older than `retain`. Returns the number removed.
    pub fn prune(&self, retain: chrono::Duration) -> usize {
        let cutoff = self.clock.now() - retain;
        self.lock().values_mut().map(|a| a.prune(cutoff)).sum()
    }
}
