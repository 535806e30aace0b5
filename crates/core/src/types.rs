/// Identifier of a managed messaging-bot account.
pub type AccountId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
