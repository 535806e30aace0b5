//! Handlers for the dashboard, per-account views and activity ingress.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use fleetwatch_core::dashboard::{AccountDetail, DashboardSnapshot};
use fleetwatch_core::latency::LatencyStats;
use fleetwatch_monitor::IngressEvent;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::query::{LimitParams, MAX_LIMIT};
use crate::response::DataResponse;
use crate::state::AppState;

/// Default number of events returned by `GET /events`.
const DEFAULT_EVENT_LIMIT: usize = 50;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RecordScanRequest {
    pub duration_ms: i64,
}

#[derive(Debug, Serialize)]
pub struct ScanRecorded {
    pub account_id: String,
    pub duration_ms: i64,
}

/// One non-scan activity signal.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivitySignal {
    Connection {
        connected: bool,
    },
    Message {
        success: bool,
        response_time_ms: Option<u64>,
    },
    Error,
    LockFailure,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /dashboard
pub async fn get_dashboard(State(state): State<AppState>) -> Json<DataResponse<DashboardSnapshot>> {
    Json(DataResponse {
        data: state.orchestrator.dashboard_state(),
    })
}

/// GET /accounts/{account_id}/metrics
///
/// Merged latency, health and diagnostics view. 404 for an account the
/// monitor has never seen.
pub async fn get_account_metrics(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> AppResult<Json<DataResponse<AccountDetail>>> {
    let detail = state.orchestrator.account_metrics(&account_id)?;
    Ok(Json(DataResponse { data: detail }))
}

/// GET /accounts/{account_id}/latency
///
/// 409 `INSUFFICIENT_DATA` until the account has enough samples.
pub async fn get_account_latency(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> AppResult<Json<DataResponse<LatencyStats>>> {
    let stats = state.orchestrator.latency_stats(&account_id)?;
    Ok(Json(DataResponse { data: stats }))
}

/// POST /accounts/{account_id}/scans
pub async fn record_scan(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(body): Json<RecordScanRequest>,
) -> AppResult<(StatusCode, Json<DataResponse<ScanRecorded>>)> {
    if body.duration_ms < 0 {
        return Err(AppError::BadRequest(
            "duration_ms must not be negative".to_string(),
        ));
    }
    if !state
        .orchestrator
        .record_qr_scan(&account_id, body.duration_ms)
        .await
    {
        return Err(AppError::BadRequest("Scan sample was rejected".to_string()));
    }
    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: ScanRecorded {
                account_id,
                duration_ms: body.duration_ms,
            },
        }),
    ))
}

/// POST /accounts/{account_id}/activity
pub async fn record_activity(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(signal): Json<ActivitySignal>,
) -> AppResult<StatusCode> {
    let o = &state.orchestrator;
    let accepted = match signal {
        ActivitySignal::Connection { connected } => o.record_connection_state(&account_id, connected),
        ActivitySignal::Message {
            success,
            response_time_ms,
        } => o.record_message_outcome(&account_id, success, response_time_ms),
        ActivitySignal::Error => o.record_error(&account_id),
        ActivitySignal::LockFailure => o.record_lock_failure(&account_id),
    };
    if !accepted {
        return Err(AppError::BadRequest("Activity signal was rejected".to_string()));
    }
    Ok(StatusCode::ACCEPTED)
}

/// GET /events?limit=
pub async fn list_events(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Json<DataResponse<Vec<IngressEvent>>> {
    let limit = params.limit.unwrap_or(DEFAULT_EVENT_LIMIT).min(MAX_LIMIT);
    Json(DataResponse {
        data: state.orchestrator.event_history(limit),
    })
}
