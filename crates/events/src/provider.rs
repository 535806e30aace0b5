//! The seam between the dispatcher and concrete delivery channels.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetwatch_core::channels::Channel;
use fleetwatch_core::error::CoreError;
use fleetwatch_core::notification::Priority;
use serde::Serialize;

use crate::delivery::email::EmailError;
use crate::delivery::webhook::WebhookError;

/// A rendered notification ready for a provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMessage {
    pub notification_type: String,
    pub account_key: String,
    pub priority: Priority,
    pub subject: String,
    pub body: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// What a provider reports back on success.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryReceipt {
    /// Identifier assigned by the remote system, when it returns one.
    pub remote_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Http(#[from] WebhookError),

    #[error(transparent)]
    Email(#[from] EmailError),

    #[error("No recipient configured for channel {0}")]
    MissingRecipient(Channel),

    #[error("Delivery rejected: {0}")]
    Rejected(String),
}

impl DeliveryError {
    pub fn into_core(self, channel: Channel) -> CoreError {
        CoreError::ChannelDelivery {
            channel: channel.to_string(),
            message: self.to_string(),
        }
    }
}

/// One delivery channel. A single call is a single attempt; retries belong to
/// the dispatcher.
#[async_trait]
pub trait ChannelProvider: Send + Sync {
    fn channel(&self) -> Channel;

    async fn send(
        &self,
        message: &OutboundMessage,
        recipient: &str,
    ) -> Result<DeliveryReceipt, DeliveryError>;
}

/// Fail fast when a channel needs an explicit address.
pub(crate) fn require_recipient(channel: Channel, recipient: &str) -> Result<(), DeliveryError> {
    if recipient.trim().is_empty() {
        Err(DeliveryError::MissingRecipient(channel))
    } else {
        Ok(())
    }
}
