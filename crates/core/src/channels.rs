//! Notification channel identifiers.
//!
//! The string forms are what callers put in `NotificationRequest::channels`
//! and what is stored in the `notifications` collection.

use serde::{Deserialize, Serialize};

pub const CHANNEL_SMS: &str = "sms";
pub const CHANNEL_EMAIL: &str = "email";
pub const CHANNEL_CHAT: &str = "chat";
pub const CHANNEL_PUSH: &str = "push";
pub const CHANNEL_IN_APP: &str = "inApp";

/// A delivery channel for alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    #[serde(rename = "sms")]
    Sms,
    #[serde(rename = "email")]
    Email,
    #[serde(rename = "chat")]
    Chat,
    #[serde(rename = "push")]
    Push,
    #[serde(rename = "inApp")]
    InApp,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::Sms,
        Channel::Email,
        Channel::Chat,
        Channel::Push,
        Channel::InApp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Sms => CHANNEL_SMS,
            Channel::Email => CHANNEL_EMAIL,
            Channel::Chat => CHANNEL_CHAT,
            Channel::Push => CHANNEL_PUSH,
            Channel::InApp => CHANNEL_IN_APP,
        }
    }

    /// Parse a channel name. Accepts `in_app` as an alias for `inApp`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            CHANNEL_SMS => Some(Channel::Sms),
            CHANNEL_EMAIL => Some(Channel::Email),
            CHANNEL_CHAT => Some(Channel::Chat),
            CHANNEL_PUSH => Some(Channel::Push),
            CHANNEL_IN_APP | "in_app" => Some(Channel::InApp),
            _ => None,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
