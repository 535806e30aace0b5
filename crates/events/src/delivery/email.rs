//! Email delivery via SMTP.
//!
//! [`EmailProvider`] wraps the `lettre` async SMTP transport to send
//! plain-text alert emails. If `SMTP_HOST` is not set,
//! [`EmailConfig::from_env`] returns `None` and no provider is registered.

use async_trait::async_trait;
use fleetwatch_core::channels::Channel;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::provider::{
    require_recipient, ChannelProvider, DeliveryError, DeliveryReceipt, OutboundMessage,
};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    /// SMTP transport-level failure (authentication, connection, etc.).
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    /// The recipient or sender address could not be parsed.
    #[error("Email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    /// The MIME message could not be assembled.
    #[error("Email build error: {0}")]
    Build(String),
}

// ---------------------------------------------------------------------------
// EmailConfig
// ---------------------------------------------------------------------------

/// Default SMTP port (STARTTLS).
const DEFAULT_SMTP_PORT: u16 = 587;

/// Default sender address when `SMTP_FROM` is not set.
const DEFAULT_FROM_ADDRESS: &str = "alerts@fleetwatch.local";

/// Subject prefix on every alert email.
const SUBJECT_PREFIX: &str = "[Fleetwatch]";

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    /// RFC 5322 "From" address.
    pub from_address: String,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
}

impl EmailConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable         | Required | Default                    |
    /// |------------------|----------|----------------------------|
    /// | `SMTP_HOST`      | yes      | none                       |
    /// | `SMTP_PORT`      | no       | `587`                      |
    /// | `SMTP_FROM`      | no       | `alerts@fleetwatch.local`  |
    /// | `SMTP_USER`      | no       | none                       |
    /// | `SMTP_PASSWORD`  | no       | none                       |
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let smtp_host = lookup("SMTP_HOST").filter(|h| !h.trim().is_empty())?;
        Some(Self {
            smtp_host,
            smtp_port: lookup("SMTP_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_SMTP_PORT),
            from_address: lookup("SMTP_FROM").unwrap_or_else(|| DEFAULT_FROM_ADDRESS.to_string()),
            smtp_user: lookup("SMTP_USER"),
            smtp_password: lookup("SMTP_PASSWORD"),
        })
    }
}

// ---------------------------------------------------------------------------
// EmailProvider
// ---------------------------------------------------------------------------

pub struct EmailProvider {
    config: EmailConfig,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailProvider {
    pub fn new(config: EmailConfig) -> Result<Self, EmailError> {
        let mut transport_builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
                .port(config.smtp_port);

        if let (Some(user), Some(pass)) = (&config.smtp_user, &config.smtp_password) {
            transport_builder =
                transport_builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            mailer: transport_builder.build(),
            config,
        })
    }

    /// Assemble the MIME message for one recipient.
    pub fn build_message(&self, to: &str, message: &OutboundMessage) -> Result<Message, EmailError> {
        build_message(&self.config.from_address, to, message)
    }
}

fn build_message(from: &str, to: &str, message: &OutboundMessage) -> Result<Message, EmailError> {
    let subject = format!("{SUBJECT_PREFIX} {}", message.subject);
    let body = format!(
        "{}\n\nAccount: {}\nType: {}\nPriority: {:?}\nTime: {}",
        message.body,
        message.account_key,
        message.notification_type,
        message.priority,
        message.timestamp,
    );

    Message::builder()
        .from(from.parse()?)
        .to(to.parse()?)
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(body)
        .map_err(|e| EmailError::Build(e.to_string()))
}

#[async_trait]
impl ChannelProvider for EmailProvider {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(
        &self,
        message: &OutboundMessage,
        recipient: &str,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        require_recipient(Channel::Email, recipient)?;
        let email = self.build_message(recipient, message)?;
        let response = self.mailer.send(email).await.map_err(EmailError::from)?;

        tracing::info!(
            to = recipient,
            notification_type = %message.notification_type,
            "Alert email sent"
        );
        let remote_id = response.message().next().map(str::to_string);
        Ok(DeliveryReceipt { remote_id })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
