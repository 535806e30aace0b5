//! Fleetwatch alert delivery.
//!
//! - [`NotificationDispatcher`]: cooldown throttling, time-window
//!   aggregation and per-channel retry over any set of providers.
//! - [`ChannelProvider`]: the one capability every delivery channel offers.
//! - [`delivery`]: chat webhook, SMTP email, SMS/push gateway and in-app
//!   providers.
//! - [`AlertBus`]: in-process publish/subscribe hub for in-app alerts.
//! - [`templates`]: `{{key}}` templates for subjects and bodies.

pub mod bus;
pub mod delivery;
pub mod dispatcher;
pub mod provider;
pub mod templates;

pub use bus::{AlertBus, AlertEvent};
pub use delivery::email::{EmailConfig, EmailProvider};
pub use delivery::gateway::GatewayProvider;
pub use delivery::in_app::InAppProvider;
pub use delivery::webhook::ChatWebhookProvider;
pub use dispatcher::NotificationDispatcher;
pub use provider::{ChannelProvider, DeliveryError, DeliveryReceipt, OutboundMessage};
pub use templates::TemplateRegistry;
