#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Insufficient data for {account_id}: {sample_count} of {required} samples")]
    InsufficientData {
        account_id: String,
        sample_count: usize,
        required: usize,
    },

    #[error("Persistence unavailable: {0}")]
    Persistence(String),

    #[error("Delivery failed on channel {channel}: {message}")]
    ChannelDelivery { channel: String, message: String },

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Internal error: {0}")]
    Internal(String),
}
