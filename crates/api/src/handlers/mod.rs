pub mod monitor;
pub mod notifications;
