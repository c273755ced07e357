use thiserror::Error;

/// Errors raised by the stream log and its consumers.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A read or ack named a consumer group that was never created.
    #[error("No such consumer group: {group} on {stream}")]
    NoGroup { stream: String, group: String },

    /// An entry is missing a required field or carries an unreadable one.
    #[error("Malformed entry {id}: {reason}")]
    Malformed { id: u64, reason: String },

    #[error("Stream connection poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, StreamError>;
