use thiserror::Error;

/// Errors that abort one scheduler tick. Never fatal to the process — the
/// next tick retries from durable state.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Metadata store error: {0}")]
    Store(#[from] conductor_store::StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] conductor_queue::QueueError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
