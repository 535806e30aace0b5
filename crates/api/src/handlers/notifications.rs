//! Handlers for notification history and statistics.

use axum::extract::{Query, State};
use axum::Json;
use fleetwatch_core::notification::{HistoryFilter, NotificationRecord, NotificationStatistics};

use crate::query::NotificationParams;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /notifications?type=&account=&since=&until=&limit=
///
/// Newest first, 50 records unless `limit` says otherwise.
pub async fn list_notifications(
    State(state): State<AppState>,
    Query(params): Query<NotificationParams>,
) -> Json<DataResponse<Vec<NotificationRecord>>> {
    let filter = HistoryFilter::from(params);
    Json(DataResponse {
        data: state.orchestrator.notification_history(&filter),
    })
}

/// GET /notifications/stats?type=&account=&since=&until=&limit=
pub async fn notification_stats(
    State(state): State<AppState>,
    Query(params): Query<NotificationParams>,
) -> Json<DataResponse<NotificationStatistics>> {
    let filter = HistoryFilter::from(params);
    Json(DataResponse {
        data: state.orchestrator.notification_statistics(&filter),
    })
}
