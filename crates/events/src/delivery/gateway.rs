//! SMS and push delivery through an HTTP messaging gateway.
//!
//! Both channels speak the same small JSON contract:
//! `POST {url}` with `{"to", "title", "message", "priority"}` and an optional
//! bearer token. A gateway that answers with `{"id": ...}` has the id
//! recorded on the receipt.

use async_trait::async_trait;
use fleetwatch_core::channels::Channel;
use serde::Deserialize;

use crate::delivery::webhook::{http_client, post_json, WebhookError};
use crate::provider::{
    require_recipient, ChannelProvider, DeliveryError, DeliveryReceipt, OutboundMessage,
};

/// SMS bodies longer than this are truncated before sending.
pub const SMS_MAX_CHARS: usize = 320;

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    id: Option<String>,
}

pub struct GatewayProvider {
    channel: Channel,
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl GatewayProvider {
    pub fn sms(url: impl Into<String>, token: Option<String>) -> Result<Self, WebhookError> {
        Self::new(Channel::Sms, url, token)
    }

    pub fn push(url: impl Into<String>, token: Option<String>) -> Result<Self, WebhookError> {
        Self::new(Channel::Push, url, token)
    }

    fn new(channel: Channel, url: impl Into<String>, token: Option<String>) -> Result<Self, WebhookError> {
        Ok(Self {
            channel,
            client: http_client()?,
            url: url.into(),
            token,
        })
    }

    /// Providers configured by `SMS_GATEWAY_URL`, `PUSH_GATEWAY_URL` and the
    /// shared `GATEWAY_TOKEN`.
    pub fn from_env() -> Result<Vec<Self>, WebhookError> {
        let token = std::env::var("GATEWAY_TOKEN").ok().filter(|t| !t.is_empty());
        let mut providers = Vec::new();
        if let Some(url) = std::env::var("SMS_GATEWAY_URL").ok().filter(|u| !u.is_empty()) {
            providers.push(Self::sms(url, token.clone())?);
        }
        if let Some(url) = std::env::var("PUSH_GATEWAY_URL").ok().filter(|u| !u.is_empty()) {
            providers.push(Self::push(url, token)?);
        }
        Ok(providers)
    }

    pub fn payload(&self, message: &OutboundMessage, recipient: &str) -> serde_json::Value {
        let text = match self.channel {
            Channel::Sms => truncate_chars(&format!("{}: {}", message.subject, message.body), SMS_MAX_CHARS),
            _ => message.body.clone(),
        };
        serde_json::json!({
            "to": recipient,
            "title": message.subject,
            "message": text,
            "priority": message.priority,
            "type": message.notification_type,
            "account": message.account_key,
        })
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[async_trait]
impl ChannelProvider for GatewayProvider {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(
        &self,
        message: &OutboundMessage,
        recipient: &str,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        require_recipient(self.channel, recipient)?;
        let payload = self.payload(message, recipient);
        let response = post_json(&self.client, &self.url, self.token.as_deref(), &payload).await?;

        // Gateways are not required to return a body.
        let remote_id = response
            .json::<GatewayResponse>()
            .await
            .ok()
            .and_then(|r| r.id);

        tracing::debug!(
            channel = %self.channel,
            notification_type = %message.notification_type,
            "Gateway delivery accepted"
        );
        Ok(DeliveryReceipt { remote_id })
    }
}
