//! Chat delivery through an incoming-webhook URL.
//!
//! [`ChatWebhookProvider`] posts a JSON message to a chat room webhook
//! (Slack/Mattermost/Teams style `{"text": ...}` payloads). One call is one
//! HTTP attempt; the dispatcher owns retries and backoff.

use std::time::Duration;

use async_trait::async_trait;
use fleetwatch_core::channels::Channel;

use crate::provider::{ChannelProvider, DeliveryError, DeliveryReceipt, OutboundMessage};

/// HTTP request timeout for a single delivery attempt.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for HTTP-based delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote server returned a non-2xx status code.
    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),
}

/// Build the shared HTTP client used by the webhook and gateway providers.
pub(crate) fn http_client() -> Result<reqwest::Client, WebhookError> {
    Ok(reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?)
}

/// Execute a single POST request and check the response status.
pub(crate) async fn post_json(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    payload: &serde_json::Value,
) -> Result<reqwest::Response, WebhookError> {
    let mut request = client.post(url).json(payload);
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }
    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(WebhookError::HttpStatus(response.status().as_u16()));
    }
    Ok(response)
}

// ---------------------------------------------------------------------------
// ChatWebhookProvider
// ---------------------------------------------------------------------------

pub struct ChatWebhookProvider {
    client: reqwest::Client,
    url: String,
}

impl ChatWebhookProvider {
    pub fn new(url: impl Into<String>) -> Result<Self, WebhookError> {
        Ok(Self {
            client: http_client()?,
            url: url.into(),
        })
    }

    /// `CHAT_WEBHOOK_URL`, or `None` when chat delivery is not configured.
    pub fn from_env() -> Result<Option<Self>, WebhookError> {
        match std::env::var("CHAT_WEBHOOK_URL") {
            Ok(url) if !url.trim().is_empty() => Self::new(url.trim()).map(Some),
            _ => Ok(None),
        }
    }

    /// The JSON body posted to the webhook.
    pub fn payload(message: &OutboundMessage, recipient: &str) -> serde_json::Value {
        let mention = if recipient.is_empty() {
            String::new()
        } else {
            format!("{recipient} ")
        };
        serde_json::json!({
            "text": format!("{mention}*{}*\n{}", message.subject, message.body),
            "type": message.notification_type,
            "account": message.account_key,
            "priority": message.priority,
            "timestamp": message.timestamp,
        })
    }
}

#[async_trait]
impl ChannelProvider for ChatWebhookProvider {
    fn channel(&self) -> Channel {
        Channel::Chat
    }

    async fn send(
        &self,
        message: &OutboundMessage,
        recipient: &str,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let payload = Self::payload(message, recipient);
        post_json(&self.client, &self.url, None, &payload).await?;
        tracing::debug!(
            notification_type = %message.notification_type,
            account_key = %message.account_key,
            "Chat webhook delivered"
        );
        Ok(DeliveryReceipt::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
