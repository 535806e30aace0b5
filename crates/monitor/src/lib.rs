//! Fleetwatch monitoring pipeline.
//!
//! [`Orchestrator`] owns the stateful components and drives them from the
//! [`Scheduler`]:
//!
//! - [`LatencySampleStore`]: scan samples and cached latency statistics.
//! - [`ActivityTracker`]: sliding-window counters that feed scoring and
//!   diagnostics.
//! - [`HealthScorer`] and [`DiagnosticsEngine`]: per-account report history
//!   around the pure scoring and rule code in `fleetwatch-core`.
//! - [`EventLog`]: recent scan ingress events.
//!
//! Alerts go out through a shared `fleetwatch_events::NotificationDispatcher`.

pub mod activity;
pub mod diagnostics_engine;
pub mod event_log;
pub mod health_scorer;
pub mod latency_store;
pub mod orchestrator;
mod persist;
pub mod registry;
pub mod scheduler;

pub use activity::ActivityTracker;
pub use diagnostics_engine::DiagnosticsEngine;
pub use event_log::{EventLog, IngressEvent};
pub use health_scorer::HealthScorer;
pub use latency_store::LatencySampleStore;
pub use orchestrator::Orchestrator;
pub use registry::{AccountRegistry, StaticAccountRegistry};
pub use scheduler::{CycleGuard, RecurringTask, Scheduler};
