//! `conductor-queue` — durable queue with lease (visibility) semantics.
//!
//! # Protocol
//!
//! A received message is invisible to other consumers for the lease duration
//! passed at receive time. While work is in flight a [`lease::LeaseKeeper`]
//! renews the lease on a cadence strictly shorter than the lease itself.
//! Deleting the message is the only terminal transition; if the consumer
//! dies, renewals stop and the message becomes visible again — whole-job
//! redelivery is the sole retry mechanism (at-least-once, never exactly-once).

pub mod error;
pub mod lease;
pub mod queue;
pub mod types;

pub use error::{QueueError, Result};
pub use lease::LeaseKeeper;
pub use queue::{LeaseQueue, SqliteLeaseQueue};
pub use types::{LeaseHandle, QueueMessage};
