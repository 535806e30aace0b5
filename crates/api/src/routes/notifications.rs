use axum::routing::get;
use axum::Router;

use crate::handlers::notifications;
use crate::state::AppState;

/// Routes mounted at `/api/v1/notifications`.
///
/// ```text
/// GET /        history
/// GET /stats   statistics
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(notifications::list_notifications))
        .route("/stats", get(notifications::notification_stats))
}
