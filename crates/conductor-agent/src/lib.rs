//! `conductor-agent` — queue-consuming worker that executes packaged jobs.
//!
//! The worker loop receives a message under a lease, verifies it belongs on
//! this queue, and runs two concurrent activities joined at completion: a
//! heartbeat renewing the lease, and the execution pipeline
//! (resolve → execute → reconcile). Deterministic outcomes — success or a
//! reported failure — delete the message; only process death leaves it to
//! lease expiry and redelivery on another agent.

pub mod entrypoint;
pub mod error;
pub mod executor;
pub mod worker;

pub use entrypoint::{
    EntryPoint, EntryPointFactory, EntryPointFault, EntryPointRegistry, ExecutionContext,
};
pub use error::{AgentError, Result};
pub use executor::{ExecutionEngine, ExecutionOutcome};
pub use worker::AgentWorker;
