use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` when the document store is unreachable.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether the document store answers; `true` when none is configured.
    pub store_healthy: bool,
    /// Whether the monitor's recurring cycles are running.
    pub monitor_running: bool,
}

/// GET /health -- service, store and monitor health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let store_healthy = match &state.store {
        Some(store) => store.health_check().await.is_ok(),
        None => true,
    };
    let status = if store_healthy { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        store_healthy,
        monitor_running: state.orchestrator.is_running(),
    })
}

/// Mount health check routes (root level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
