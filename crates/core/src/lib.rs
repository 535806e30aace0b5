//! Fleetwatch core domain logic.
//!
//! Pure types, constants and calculations shared by the store, event and
//! monitor crates. Nothing in here performs I/O or spawns tasks.

pub mod channels;
pub mod clock;
pub mod config;
pub mod dashboard;
pub mod diagnostics;
pub mod error;
pub mod health;
pub mod latency;
pub mod notification;
pub mod threshold_validation;
pub mod types;
