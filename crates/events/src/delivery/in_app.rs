//! In-app delivery onto the [`AlertBus`].

use std::sync::Arc;

use async_trait::async_trait;
use fleetwatch_core::channels::Channel;

use crate::bus::{AlertBus, AlertEvent};
use crate::provider::{ChannelProvider, DeliveryError, DeliveryReceipt, OutboundMessage};

pub struct InAppProvider {
    bus: Arc<AlertBus>,
}

impl InAppProvider {
    pub fn new(bus: Arc<AlertBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl ChannelProvider for InAppProvider {
    fn channel(&self) -> Channel {
        Channel::InApp
    }

    /// Succeeds even with no subscribers; the alert is simply not seen.
    async fn send(
        &self,
        message: &OutboundMessage,
        recipient: &str,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let receivers = self.bus.publish(AlertEvent {
            notification_type: message.notification_type.clone(),
            account_key: message.account_key.clone(),
            priority: message.priority,
            subject: message.subject.clone(),
            body: message.body.clone(),
            recipient: recipient.to_string(),
            timestamp: message.timestamp,
        });
        tracing::debug!(receivers, notification_type = %message.notification_type, "In-app alert published");
        Ok(DeliveryReceipt::default())
    }
}
