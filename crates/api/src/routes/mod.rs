pub mod health;
pub mod monitor;
pub mod notifications;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /dashboard                               dashboard snapshot (GET)
/// /accounts/{account_id}/metrics           merged account view (GET)
/// /accounts/{account_id}/latency           latency statistics (GET)
/// /accounts/{account_id}/scans             record a scan (POST)
/// /accounts/{account_id}/activity          record an activity signal (POST)
/// /events                                  recent scan events (GET)
///
/// /notifications                           notification history (GET)
/// /notifications/stats                     notification statistics (GET)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(monitor::router())
        .nest("/notifications", notifications::router())
}
