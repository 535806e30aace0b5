//! In-process alert bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`AlertBus`] carries [`AlertEvent`]s delivered on the in-app channel to any
//! number of subscribers (dashboards, sockets, loggers). Share it via
//! `Arc<AlertBus>`.

use chrono::{DateTime, Utc};
use fleetwatch_core::notification::Priority;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// AlertEvent
// ---------------------------------------------------------------------------

/// An alert delivered in-app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Dot-separated notification type, e.g. `"diagnostic.slow_scan"`.
    pub notification_type: String,
    pub account_key: String,
    pub priority: Priority,
    pub subject: String,
    pub body: String,
    /// Room or user the alert is addressed to, empty for broadcast.
    pub recipient: String,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// AlertBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 256;

/// In-process fan-out alert bus.
pub struct AlertBus {
    sender: broadcast::Sender<AlertEvent>,
}

impl AlertBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest unread alerts are dropped and slow
    /// receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers. Returns how many received it.
    pub fn publish(&self, event: AlertEvent) -> usize {
        // A send error only means there are no receivers.
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for AlertBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
