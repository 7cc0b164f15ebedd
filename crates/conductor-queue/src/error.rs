use thiserror::Error;

/// Errors that can occur within the lease queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The message body could not be (de)serialized.
    #[error("Message serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The lease expired (or the message was deleted) before this operation;
    /// another consumer may already hold the message.
    #[error("Lease lost for message {message_id}")]
    LeaseLost { message_id: i64 },
}

pub type Result<T> = std::result::Result<T, QueueError>;
