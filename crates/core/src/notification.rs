//! Notification request/record model and dispatch policy helpers.
//!
//! The dispatcher in `fleetwatch-events` owns the mutable state (cooldowns,
//! aggregation queues, history). This module holds the shapes it exchanges
//! and the pure rules it applies.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channels::Channel;
use crate::diagnostics::Severity;
use crate::error::CoreError;
use crate::threshold_validation::validate_positive;
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default page size for history queries.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Upper bound on a single backoff wait, regardless of attempt number.
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl From<Severity> for Priority {
    fn from(s: Severity) -> Self {
        match s {
            Severity::Low => Priority::Low,
            Severity::Medium => Priority::Normal,
            Severity::High => Priority::High,
            Severity::Critical => Priority::Critical,
        }
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A request to notify someone about an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRequest {
    #[serde(rename = "type")]
    pub notification_type: String,
    pub account_key: String,
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub priority: Priority,
    /// Registered template name, or a literal template string.
    #[serde(default)]
    pub template: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub aggregation_key: Option<String>,
}

impl NotificationRequest {
    /// A request on the in-app channel with normal priority.
    pub fn new(notification_type: impl Into<String>, account_key: impl Into<String>) -> Self {
        Self {
            notification_type: notification_type.into(),
            account_key: account_key.into(),
            channels: vec![Channel::InApp],
            priority: Priority::Normal,
            template: String::new(),
            data: serde_json::Value::Object(Default::default()),
            aggregation_key: None,
        }
    }

    pub fn with_channels(mut self, channels: impl IntoIterator<Item = Channel>) -> Self {
        self.channels = channels.into_iter().collect();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_aggregation_key(mut self, key: impl Into<String>) -> Self {
        self.aggregation_key = Some(key.into());
        self
    }

    /// `type:accountKey`; cooldown and default aggregation key off this.
    pub fn dedup_key(&self) -> String {
        dedup_key(&self.notification_type, &self.account_key)
    }

    /// Reject requests that could never be delivered.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.notification_type.trim().is_empty() {
            return Err(CoreError::Validation(
                "notification type must not be empty".to_string(),
            ));
        }
        if self.account_key.trim().is_empty() {
            return Err(CoreError::Validation(
                "notification account key must not be empty".to_string(),
            ));
        }
        if self.channels.is_empty() {
            return Err(CoreError::Validation(
                "notification must name at least one channel".to_string(),
            ));
        }
        if matches!(&self.aggregation_key, Some(k) if k.trim().is_empty()) {
            return Err(CoreError::Validation(
                "aggregation key must not be blank when provided".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn dedup_key(notification_type: &str, account_key: &str) -> String {
    format!("{notification_type}:{account_key}")
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

/// Outcome of delivering on one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelResult {
    pub channel: Channel,
    pub status: DeliveryStatus,
    pub delivery_time_ms: u64,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Success,
    PartialFailure,
    Throttled,
    Aggregated,
}

/// `Success` only when every channel reports `Sent`.
pub fn overall_status(results: &[ChannelResult]) -> OverallStatus {
    if !results.is_empty() && results.iter().all(|r| r.status == DeliveryStatus::Sent) {
        OverallStatus::Success
    } else {
        OverallStatus::PartialFailure
    }
}

/// A delivered (or attempted) notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: uuid::Uuid,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub account_key: String,
    pub priority: Priority,
    pub channel_results: Vec<ChannelResult>,
    pub overall_status: OverallStatus,
    pub sent_at: Timestamp,
    pub aggregated: bool,
    /// Number of requests this record stands for.
    pub count: usize,
    pub data: serde_json::Value,
}

/// What `send` did with a request.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Delivered(NotificationRecord),
    Throttled { key: String, retry_after_secs: i64 },
    Aggregated { key: String, queued: usize },
}

impl SendOutcome {
    pub fn status(&self) -> OverallStatus {
        match self {
            SendOutcome::Delivered(record) => record.overall_status,
            SendOutcome::Throttled { .. } => OverallStatus::Throttled,
            SendOutcome::Aggregated { .. } => OverallStatus::Aggregated,
        }
    }

    pub fn record(&self) -> Option<&NotificationRecord> {
        match self {
            SendOutcome::Delivered(record) => Some(record),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Wait before retrying after failed attempt number `attempt` (1-based):
/// `base × 2^(attempt − 1)`, capped at [`MAX_BACKOFF`].
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(20);
    base.saturating_mul(1u32 << exp).min(MAX_BACKOFF)
}

/// Dispatcher tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub cooldown_secs: u64,
    /// Maximum delivery attempts per channel.
    pub retry_count: u32,
    pub base_delay_ms: u64,
    /// Positive values batch every request by its dedup key.
    pub aggregation_window_secs: u64,
    /// Flush interval used when no global window is configured.
    pub flush_interval_secs: u64,
    /// Records kept in memory for history queries.
    pub history_limit: usize,
    /// Default recipient per channel.
    pub recipients: BTreeMap<Channel, String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 3_600,
            retry_count: 3,
            base_delay_ms: 1_000,
            aggregation_window_secs: 0,
            flush_interval_secs: 60,
            history_limit: 1_000,
            recipients: BTreeMap::new(),
        }
    }
}

impl NotificationConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.retry_count == 0 {
            return Err(CoreError::Configuration(
                "notification retry_count must be at least 1".to_string(),
            ));
        }
        if self.history_limit == 0 {
            return Err(CoreError::Configuration(
                "notification history_limit must be at least 1".to_string(),
            ));
        }
        validate_positive(self.flush_interval_secs as f64, "flush_interval_secs")
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cooldown_secs as i64)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn aggregates_globally(&self) -> bool {
        self.aggregation_window_secs > 0
    }

    /// How often aggregation queues are flushed.
    pub fn flush_interval(&self) -> Duration {
        if self.aggregates_globally() {
            Duration::from_secs(self.aggregation_window_secs)
        } else {
            Duration::from_secs(self.flush_interval_secs)
        }
    }
}

// ---------------------------------------------------------------------------
// History queries
// ---------------------------------------------------------------------------

/// Filter for history and statistics queries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryFilter {
    #[serde(rename = "type")]
    pub notification_type: Option<String>,
    pub account_key: Option<String>,
    pub since: Option<Timestamp>,
    pub until: Option<Timestamp>,
    pub limit: Option<usize>,
}

impl HistoryFilter {
    pub fn matches(&self, record: &NotificationRecord) -> bool {
        self.notification_type
            .as_deref()
            .map_or(true, |t| t == record.notification_type)
            && self
                .account_key
                .as_deref()
                .map_or(true, |a| a == record.account_key)
            && self.since.map_or(true, |s| record.sent_at >= s)
            && self.until.map_or(true, |u| record.sent_at <= u)
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_HISTORY_LIMIT)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub sent: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationStatistics {
    pub total: u64,
    pub success: u64,
    pub partial_failure: u64,
    pub aggregated_records: u64,
    /// Requests represented, counting each aggregated record as its `count`.
    pub notifications_represented: u64,
    pub channels: BTreeMap<Channel, ChannelStats>,
    pub average_delivery_time_ms: f64,
}

/// Summarise the records matching a filter.
pub fn compute_statistics<'a>(
    records: impl IntoIterator<Item = &'a NotificationRecord>,
) -> NotificationStatistics {
    let mut stats = NotificationStatistics::default();
    let mut delivery_total = 0u64;
    let mut delivery_samples = 0u64;

    for record in records {
        stats.total += 1;
        stats.notifications_represented += record.count as u64;
        match record.overall_status {
            OverallStatus::Success => stats.success += 1,
            OverallStatus::PartialFailure => stats.partial_failure += 1,
            OverallStatus::Throttled | OverallStatus::Aggregated => {}
        }
        if record.aggregated {
            stats.aggregated_records += 1;
        }
        for result in &record.channel_results {
            let entry = stats.channels.entry(result.channel).or_default();
            match result.status {
                DeliveryStatus::Sent => {
                    entry.sent += 1;
                    delivery_total += result.delivery_time_ms;
                    delivery_samples += 1;
                }
                DeliveryStatus::Failed => entry.failed += 1,
            }
        }
    }

    if delivery_samples > 0 {
        stats.average_delivery_time_ms = delivery_total as f64 / delivery_samples as f64;
    }
    stats
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn result(channel: Channel, status: DeliveryStatus, ms: u64) -> ChannelResult {
        ChannelResult {
            channel,
            status,
            delivery_time_ms: ms,
            attempts: 1,
            error: None,
        }
    }

    fn record(status: OverallStatus, results: Vec<ChannelResult>) -> NotificationRecord {
        NotificationRecord {
            id: uuid::Uuid::now_v7(),
            notification_type: "X".to_string(),
            account_key: "A".to_string(),
            priority: Priority::Normal,
            channel_results: results,
            overall_status: status,
            sent_at: chrono::Utc::now(),
            aggregated: false,
            count: 1,
            data: serde_json::Value::Null,
        }
    }

    #[test]
    fn dedup_key_joins_type_and_account() {
        let req = NotificationRequest::new("qr_timeout", "acct-1");
        assert_eq!(req.dedup_key(), "qr_timeout:acct-1");
    }

    #[test]
    fn validation_rejects_empty_fields() {
        assert!(NotificationRequest::new("", "A").validate().is_err());
        assert!(NotificationRequest::new("X", " ").validate().is_err());
        assert!(NotificationRequest::new("X", "A")
            .with_channels([])
            .validate()
            .is_err());
        assert!(NotificationRequest::new("X", "A")
            .with_aggregation_key("")
            .validate()
            .is_err());
        assert!(NotificationRequest::new("X", "A").validate().is_ok());
    }

    #[test]
    fn request_deserializes_with_defaults() {
        let req: NotificationRequest = serde_json::from_value(serde_json::json!({
            "type": "X",
            "account_key": "A",
            "channels": ["inApp", "email"]
        }))
        .unwrap();
        assert_eq!(req.channels, vec![Channel::InApp, Channel::Email]);
        assert_eq!(req.priority, Priority::Normal);
        assert!(req.aggregation_key.is_none());
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, 4), Duration::from_millis(800));
        assert_eq!(backoff_delay(base, 64), MAX_BACKOFF);
    }

    #[test]
    fn overall_status_requires_every_channel() {
        let ok = vec![
            result(Channel::InApp, DeliveryStatus::Sent, 5),
            result(Channel::Email, DeliveryStatus::Sent, 5),
        ];
        assert_eq!(overall_status(&ok), OverallStatus::Success);
        let mixed = vec![
            result(Channel::InApp, DeliveryStatus::Sent, 5),
            result(Channel::Email, DeliveryStatus::Failed, 5),
        ];
        assert_eq!(overall_status(&mixed), OverallStatus::PartialFailure);
        assert_eq!(overall_status(&[]), OverallStatus::PartialFailure);
    }

    #[test]
    fn filter_matches_type_and_range() {
        let rec = record(OverallStatus::Success, vec![]);
        let mut filter = HistoryFilter::default();
        assert!(filter.matches(&rec));
        filter.notification_type = Some("Y".to_string());
        assert!(!filter.matches(&rec));
        filter.notification_type = Some("X".to_string());
        filter.since = Some(rec.sent_at + chrono::Duration::seconds(1));
        assert!(!filter.matches(&rec));
        filter.since = None;
        filter.until = Some(rec.sent_at);
        assert!(filter.matches(&rec));
        assert_eq!(filter.effective_limit(), DEFAULT_HISTORY_LIMIT);
    }

    #[test]
    fn statistics_count_channels_and_latency() {
        let records = vec![
            record(
                OverallStatus::Success,
                vec![result(Channel::InApp, DeliveryStatus::Sent, 10)],
            ),
            record(
                OverallStatus::PartialFailure,
                vec![
                    result(Channel::InApp, DeliveryStatus::Sent, 30),
                    result(Channel::Sms, DeliveryStatus::Failed, 0),
                ],
            ),
        ];
        let stats = compute_statistics(&records);
        assert_eq!(stats.total, 2);
        assert_eq!(stats.success, 1);
        assert_eq!(stats.partial_failure, 1);
        assert_eq!(stats.channels[&Channel::InApp].sent, 2);
        assert_eq!(stats.channels[&Channel::Sms].failed, 1);
        assert_eq!(stats.average_delivery_time_ms, 20.0);
    }

    #[test]
    fn flush_interval_prefers_global_window() {
        let mut cfg = NotificationConfig::default();
        assert_eq!(cfg.flush_interval(), Duration::from_secs(60));
        cfg.aggregation_window_secs = 30;
        assert!(cfg.aggregates_globally());
        assert_eq!(cfg.flush_interval(), Duration::from_secs(30));
    }
}
