use thiserror::Error;

/// Errors surfaced by the agent's own plumbing. Failures of the executed
/// job itself are not errors here — they become log lines and a `has_error`
/// flag through reconciliation.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Metadata store error: {0}")]
    Store(#[from] conductor_store::StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] conductor_queue::QueueError),
}

pub type Result<T> = std::result::Result<T, AgentError>;
