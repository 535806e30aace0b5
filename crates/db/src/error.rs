use fleetwatch_core::error::CoreError;

/// Errors raised by a [`DocumentStore`](crate::DocumentStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid index field '{0}'")]
    InvalidIndexField(String),

    #[error("Corrupt document: {0}")]
    Corrupt(String),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        CoreError::Persistence(err.to_string())
    }
}
