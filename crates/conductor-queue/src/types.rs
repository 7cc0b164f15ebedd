use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wire payload placed on the durable queue.
///
/// Field names are PascalCase on the wire — the format is shared with
/// external tooling and must not drift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    #[serde(rename = "JobInstanceId")]
    pub job_instance_id: i64,
    #[serde(rename = "JobId")]
    pub job_id: i64,
    #[serde(rename = "QueuedAt")]
    pub queued_at: DateTime<Utc>,
    /// Optional environment tag forwarded to the execution context.
    #[serde(rename = "JobEnvironment", skip_serializing_if = "Option::is_none")]
    pub job_environment: Option<String>,
    /// Target queue name, carried for receiver self-verification.
    #[serde(rename = "JobQueueName", skip_serializing_if = "Option::is_none")]
    pub job_queue_name: Option<String>,
}

/// Opaque claim on a received message.
///
/// The token is rotated on every claim, so a handle from a lapsed lease can
/// no longer extend or delete the message once another consumer holds it.
#[derive(Debug, Clone)]
pub struct LeaseHandle {
    pub(crate) message_id: i64,
    pub(crate) token: String,
}

impl LeaseHandle {
    pub fn message_id(&self) -> i64 {
        self.message_id
    }
}
