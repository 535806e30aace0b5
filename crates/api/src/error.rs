use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fleetwatch_core::error::CoreError;
use fleetwatch_db::StoreError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce `{ "error", "code" }` JSON bodies.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `fleetwatch_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A document store error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    fn classify(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::InsufficientData { .. } => {
                    (StatusCode::CONFLICT, "INSUFFICIENT_DATA", core.to_string())
                }
                CoreError::Persistence(msg) => {
                    tracing::warn!(error = %msg, "Persistence unavailable");
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "PERSISTENCE_UNAVAILABLE",
                        "The document store is unavailable".to_string(),
                    )
                }
                CoreError::ChannelDelivery { .. } => {
                    (StatusCode::BAD_GATEWAY, "DELIVERY_FAILED", core.to_string())
                }
                CoreError::Configuration(msg) | CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal core error");
                    internal()
                }
            },

            AppError::Store(err) => {
                tracing::error!(error = %err, "Document store error");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "PERSISTENCE_UNAVAILABLE",
                    "The document store is unavailable".to_string(),
                )
            }

            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
        }
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.classify();
        let body = json!({
            "error": message,
            "code": code,
        });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_and_code(err: impl Into<AppError>) -> (StatusCode, &'static str) {
        let (status, code, _) = err.into().classify();
        (status, code)
    }

    #[test]
    fn domain_errors_map_to_http_statuses() {
        assert_eq!(
            status_and_code(CoreError::NotFound {
                entity: "Account",
                id: "A".into()
            }),
            (StatusCode::NOT_FOUND, "NOT_FOUND")
        );
        assert_eq!(
            status_and_code(CoreError::Validation("bad".into())),
            (StatusCode::BAD_REQUEST, "VALIDATION_ERROR")
        );
        assert_eq!(
            status_and_code(CoreError::InsufficientData {
                account_id: "A".into(),
                sample_count: 3,
                required: 10,
            }),
            (StatusCode::CONFLICT, "INSUFFICIENT_DATA")
        );
        assert_eq!(
            status_and_code(StoreError::Unavailable("down".into())),
            (StatusCode::SERVICE_UNAVAILABLE, "PERSISTENCE_UNAVAILABLE")
        );
    }

    #[test]
    fn internal_details_are_not_leaked() {
        let (status, _, message) = AppError::from(CoreError::Internal("secret".into())).classify();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!message.contains("secret"));
    }
}
