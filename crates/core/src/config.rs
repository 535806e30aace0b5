//! Monitor configuration: every tunable the pipeline reads, with defaults.
//!
//! Values come from [`MonitorConfig::default`] or from environment variables
//! via [`MonitorConfig::from_env`]. [`MonitorConfig::validate`] must pass
//! before an orchestrator is constructed.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channels::Channel;
use crate::diagnostics::DiagnosticsConfig;
use crate::error::CoreError;
use crate::health::{HealthThresholds, HealthWeights, DEFAULT_STABLE_BAND};
use crate::latency::LatencyConfig;
use crate::notification::NotificationConfig;
use crate::threshold_validation::validate_positive;

/// Default score drop between consecutive reports that triggers diagnostics.
pub const DEFAULT_ALERT_DROP_THRESHOLD: u8 = 10;

/// Default per-account cap on retained health reports.
pub const DEFAULT_HEALTH_HISTORY_LIMIT: usize = 50;

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthConfig {
    pub thresholds: HealthThresholds,
    pub weights: HealthWeights,
    /// A drop larger than this since the previous report runs diagnostics.
    pub alert_drop_threshold: u8,
    pub history_limit: usize,
    /// Score changes smaller than this are reported as a stable trend.
    pub stable_band: i32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            thresholds: HealthThresholds::default(),
            weights: HealthWeights::default(),
            alert_drop_threshold: DEFAULT_ALERT_DROP_THRESHOLD,
            history_limit: DEFAULT_HEALTH_HISTORY_LIMIT,
            stable_band: DEFAULT_STABLE_BAND,
        }
    }
}

impl HealthConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        self.thresholds.validate()?;
        self.weights.validate()?;
        if self.history_limit == 0 {
            return Err(CoreError::Configuration(
                "health history_limit must be at least 1".to_string(),
            ));
        }
        if self.stable_band < 0 {
            return Err(CoreError::Configuration(
                "health stable_band must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Intervals of the recurring cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub health_check_interval_secs: u64,
    pub metrics_aggregation_interval_secs: u64,
    pub dashboard_update_interval_secs: u64,
    /// Capacity of the recent scan event ring buffer.
    pub event_log_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: 60,
            metrics_aggregation_interval_secs: 300,
            dashboard_update_interval_secs: 5,
            event_log_capacity: 100,
        }
    }
}

impl SchedulerConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn metrics_aggregation_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_aggregation_interval_secs)
    }

    pub fn dashboard_update_interval(&self) -> Duration {
        Duration::from_secs(self.dashboard_update_interval_secs)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        validate_positive(self.health_check_interval_secs as f64, "health_check_interval_secs")?;
        validate_positive(
            self.metrics_aggregation_interval_secs as f64,
            "metrics_aggregation_interval_secs",
        )?;
        validate_positive(
            self.dashboard_update_interval_secs as f64,
            "dashboard_update_interval_secs",
        )?;
        if self.event_log_capacity == 0 {
            return Err(CoreError::Configuration(
                "event_log_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MonitorConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub latency: LatencyConfig,
    pub health: HealthConfig,
    pub diagnostics: DiagnosticsConfig,
    pub notifications: NotificationConfig,
    pub scheduler: SchedulerConfig,
    /// Sliding window over which activity counters feed health inputs.
    pub activity_window_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            latency: LatencyConfig::default(),
            health: HealthConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
            notifications: NotificationConfig::default(),
            scheduler: SchedulerConfig::default(),
            activity_window_secs: 3_600,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                                 | Default  |
    /// |-----------------------------------------|----------|
    /// | `HEALTH_CHECK_INTERVAL_SECS`            | `60`     |
    /// | `METRICS_AGGREGATION_INTERVAL_SECS`     | `300`    |
    /// | `DASHBOARD_UPDATE_INTERVAL_SECS`        | `5`      |
    /// | `AGGREGATION_FLUSH_INTERVAL_SECS`       | `60`     |
    /// | `SCAN_RETENTION_HOURS`                  | `168`    |
    /// | `ACTIVITY_WINDOW_SECS`                  | `3600`   |
    /// | `HEALTH_ALERT_DROP_THRESHOLD`           | `10`     |
    /// | `NOTIFICATION_COOLDOWN_SECS`            | `3600`   |
    /// | `NOTIFICATION_RETRY_COUNT`              | `3`      |
    /// | `NOTIFICATION_BASE_DELAY_MS`            | `1000`   |
    /// | `NOTIFICATION_AGGREGATION_WINDOW_SECS`  | `0`      |
    /// | `ALERT_RECIPIENTS_<CHANNEL>`            | unset    |
    ///
    /// `<CHANNEL>` is one of `SMS`, `EMAIL`, `CHAT`, `PUSH`, `IN_APP`.
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading from an arbitrary
    /// lookup, so tests don't have to mutate the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let defaults = Self::default();

        let scheduler = SchedulerConfig {
            health_check_interval_secs: parse_or(
                &lookup,
                "HEALTH_CHECK_INTERVAL_SECS",
                defaults.scheduler.health_check_interval_secs,
            )?,
            metrics_aggregation_interval_secs: parse_or(
                &lookup,
                "METRICS_AGGREGATION_INTERVAL_SECS",
                defaults.scheduler.metrics_aggregation_interval_secs,
            )?,
            dashboard_update_interval_secs: parse_or(
                &lookup,
                "DASHBOARD_UPDATE_INTERVAL_SECS",
                defaults.scheduler.dashboard_update_interval_secs,
            )?,
            ..defaults.scheduler
        };

        let retention_hours: u64 = parse_or(
            &lookup,
            "SCAN_RETENTION_HOURS",
            defaults.latency.retention_secs / 3600,
        )?;
        let latency = LatencyConfig {
            retention_secs: retention_hours * 3600,
            ..defaults.latency
        };

        let health = HealthConfig {
            alert_drop_threshold: parse_or(
                &lookup,
                "HEALTH_ALERT_DROP_THRESHOLD",
                defaults.health.alert_drop_threshold,
            )?,
            ..defaults.health
        };

        let mut recipients = defaults.notifications.recipients.clone();
        for channel in Channel::ALL {
            let key = format!("ALERT_RECIPIENTS_{}", env_suffix(channel));
            if let Some(value) = lookup(&key).filter(|v| !v.trim().is_empty()) {
                recipients.insert(channel, value.trim().to_string());
            }
        }

        let notifications = NotificationConfig {
            cooldown_secs: parse_or(
                &lookup,
                "NOTIFICATION_COOLDOWN_SECS",
                defaults.notifications.cooldown_secs,
            )?,
            retry_count: parse_or(
                &lookup,
                "NOTIFICATION_RETRY_COUNT",
                defaults.notifications.retry_count,
            )?,
            base_delay_ms: parse_or(
                &lookup,
                "NOTIFICATION_BASE_DELAY_MS",
                defaults.notifications.base_delay_ms,
            )?,
            aggregation_window_secs: parse_or(
                &lookup,
                "NOTIFICATION_AGGREGATION_WINDOW_SECS",
                defaults.notifications.aggregation_window_secs,
            )?,
            flush_interval_secs: parse_or(
                &lookup,
                "AGGREGATION_FLUSH_INTERVAL_SECS",
                defaults.notifications.flush_interval_secs,
            )?,
            recipients,
            ..defaults.notifications
        };

        Ok(Self {
            latency,
            health,
            diagnostics: defaults.diagnostics,
            notifications,
            scheduler,
            activity_window_secs: parse_or(
                &lookup,
                "ACTIVITY_WINDOW_SECS",
                defaults.activity_window_secs,
            )?,
        })
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), CoreError> {
        self.latency.validate()?;
        self.health.validate()?;
        self.diagnostics.validate()?;
        self.notifications.validate()?;
        self.scheduler.validate()?;
        validate_positive(self.activity_window_secs as f64, "activity_window_secs")
    }

    pub fn activity_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.activity_window_secs as i64)
    }
}

fn env_suffix(channel: Channel) -> &'static str {
    match channel {
        Channel::Sms => "SMS",
        Channel::Email => "EMAIL",
        Channel::Chat => "CHAT",
        Channel::Push => "PUSH",
        Channel::InApp => "IN_APP",
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, CoreError> {
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|_| {
            CoreError::Configuration(format!("{key} has an invalid value: {raw:?}"))
        }),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = MonitorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.scheduler.health_check_interval_secs, 60);
        assert_eq!(config.scheduler.metrics_aggregation_interval_secs, 300);
        assert_eq!(config.scheduler.dashboard_update_interval_secs, 5);
        assert_eq!(config.health.alert_drop_threshold, 10);
        assert_eq!(config.activity_window_secs, 3_600);
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = MonitorConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, MonitorConfig::default());
    }

    #[test]
    fn environment_overrides_apply() {
        let config = MonitorConfig::from_lookup(lookup_from(&[
            ("HEALTH_CHECK_INTERVAL_SECS", "15"),
            ("SCAN_RETENTION_HOURS", "24"),
            ("NOTIFICATION_RETRY_COUNT", "5"),
            ("NOTIFICATION_AGGREGATION_WINDOW_SECS", "120"),
            ("ALERT_RECIPIENTS_EMAIL", " ops@example.com "),
            ("ALERT_RECIPIENTS_IN_APP", "ops-room"),
        ]))
        .unwrap();

        assert_eq!(config.scheduler.health_check_interval_secs, 15);
        assert_eq!(config.latency.retention_secs, 24 * 3600);
        assert_eq!(config.notifications.retry_count, 5);
        assert_eq!(config.notifications.aggregation_window_secs, 120);
        assert_eq!(
            config.notifications.recipients.get(&Channel::Email).map(String::as_str),
            Some("ops@example.com")
        );
        assert_eq!(
            config.notifications.recipients.get(&Channel::InApp).map(String::as_str),
            Some("ops-room")
        );
    }

    #[test]
    fn flush_interval_follows_aggregation_window() {
        let config = MonitorConfig::from_lookup(lookup_from(&[
            ("AGGREGATION_FLUSH_INTERVAL_SECS", "90"),
        ]))
        .unwrap();
        assert_eq!(config.notifications.flush_interval(), Duration::from_secs(90));

        let config = MonitorConfig::from_lookup(lookup_from(&[
            ("AGGREGATION_FLUSH_INTERVAL_SECS", "90"),
            ("NOTIFICATION_AGGREGATION_WINDOW_SECS", "30"),
        ]))
        .unwrap();
        assert_eq!(config.notifications.flush_interval(), Duration::from_secs(30));
    }

    #[test]
    fn unparsable_value_is_configuration_error() {
        let result = MonitorConfig::from_lookup(lookup_from(&[("NOTIFICATION_RETRY_COUNT", "many")]));
        assert_matches!(result, Err(CoreError::Configuration(msg)) if msg.contains("NOTIFICATION_RETRY_COUNT"));
    }

    #[test]
    fn zero_interval_fails_validation() {
        let mut config = MonitorConfig::default();
        config.scheduler.dashboard_update_interval_secs = 0;
        assert_matches!(config.validate(), Err(CoreError::Configuration(_)));
    }

    #[test]
    fn bad_weights_fail_validation() {
        let mut config = MonitorConfig::default();
        config.health.weights.uptime = 0.9;
        assert_matches!(config.validate(), Err(CoreError::Configuration(_)));
    }
}
