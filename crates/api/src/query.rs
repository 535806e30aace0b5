//! Query parameter types shared by the read endpoints.

use chrono::{DateTime, Utc};
use fleetwatch_core::notification::HistoryFilter;
use serde::Deserialize;

/// Largest `limit` any list endpoint honours.
pub const MAX_LIMIT: usize = 1000;

/// `?limit=` for the event history.
#[derive(Debug, Deserialize)]
pub struct LimitParams {
    pub limit: Option<usize>,
}

/// `?type=&account=&since=&until=&limit=` for notification history and
/// statistics.
#[derive(Debug, Default, Deserialize)]
pub struct NotificationParams {
    #[serde(rename = "type")]
    pub notification_type: Option<String>,
    pub account: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl From<NotificationParams> for HistoryFilter {
    fn from(p: NotificationParams) -> Self {
        HistoryFilter {
            notification_type: p.notification_type.filter(|t| !t.is_empty()),
            account_key: p.account.filter(|a| !a.is_empty()),
            since: p.since,
            until: p.until,
            limit: p.limit.map(|l| l.min(MAX_LIMIT)),
        }
    }
}
