//! Concrete [`ChannelProvider`](crate::provider::ChannelProvider)s.
//!
//! Chat goes to a webhook, email over SMTP, SMS and push through an HTTP
//! gateway, in-app onto the [`AlertBus`](crate::bus::AlertBus).

pub mod email;
pub mod gateway;
pub mod in_app;
pub mod webhook;
