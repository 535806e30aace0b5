use std::sync::Arc;

use fleetwatch_db::SharedStore;
use fleetwatch_monitor::Orchestrator;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via
/// `State<AppState>`. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// The monitoring pipeline.
    pub orchestrator: Arc<Orchestrator>,
    /// Document store backing the monitor, checked by `/health`.
    pub store: Option<SharedStore>,
    pub config: Arc<ServerConfig>,
}
