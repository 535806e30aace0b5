use axum::routing::{get, post};
use axum::Router;

use crate::handlers::monitor;
use crate::state::AppState;

/// Routes mounted at the `/api/v1` root.
///
/// ```text
/// GET  /dashboard
/// GET  /accounts/{account_id}/metrics
/// GET  /accounts/{account_id}/latency
/// POST /accounts/{account_id}/scans
/// POST /accounts/{account_id}/activity
/// GET  /events
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/dashboard", get(monitor::get_dashboard))
        .route("/accounts/{account_id}/metrics", get(monitor::get_account_metrics))
        .route("/accounts/{account_id}/latency", get(monitor::get_account_latency))
        .route("/accounts/{account_id}/scans", post(monitor::record_scan))
        .route("/accounts/{account_id}/activity", post(monitor::record_activity))
        .route("/events", get(monitor::list_events))
}
