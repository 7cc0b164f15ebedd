use thiserror::Error;

/// Errors that can occur within the metadata store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// No job with the given ID exists.
    #[error("Job not found: {id}")]
    JobNotFound { id: i64 },

    /// No job instance with the given ID exists.
    #[error("Job instance not found: {id}")]
    InstanceNotFound { id: i64 },
}

pub type Result<T> = std::result::Result<T, StoreError>;
