//! Bounded log of recent scan ingress events.

use std::collections::VecDeque;
use std::sync::Mutex;

use fleetwatch_core::types::{AccountId, Timestamp};
use serde::{Deserialize, Serialize};

/// Default number of events retained.
pub const DEFAULT_EVENT_LOG_CAPACITY: usize = 100;

/// One recorded scan, as seen at ingress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressEvent {
    pub account_id: AccountId,
    pub duration_ms: u64,
    pub timestamp: Timestamp,
    /// Whether the scan met or exceeded the account's recommended timeout.
    pub timed_out: bool,
}

/// Ring buffer of [`IngressEvent`]s; the oldest entry is evicted when full.
#[derive(Debug)]
pub struct EventLog {
    capacity: usize,
    events: Mutex<VecDeque<IngressEvent>>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&self, event: IngressEvent) {
        let mut events = self.events.lock().unwrap_or_else(|p| p.into_inner());
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Up to `limit` events, newest first.
    pub fn recent(&self, limit: usize) -> Vec<IngressEvent> {
        let events = self.events.lock().unwrap_or_else(|p| p.into_inner());
        events.iter().rev().take(limit).cloned().collect()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn event(duration_ms: u64) -> IngressEvent {
        IngressEvent {
            account_id: "A".to_string(),
            duration_ms,
            timestamp: Utc::now(),
            timed_out: false,
        }
    }

    #[test]
    fn oldest_events_are_evicted() {
        let log = EventLog::new(3);
        for d in 1..=5 {
            log.push(event(d));
        }
        let durations: Vec<u64> = log.recent(10).iter().map(|e| e.duration_ms).collect();
        assert_eq!(durations, vec![5, 4, 3]);
    }

    #[test]
    fn recent_respects_limit() {
        let log = EventLog::default();
        for d in 0..10 {
            log.push(event(d));
        }
        assert_eq!(log.recent(2).len(), 2);
        assert!(log.recent(0).is_empty());
    }
}
