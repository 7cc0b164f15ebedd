use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use conductor_core::config::AgentConfig;
use conductor_queue::{LeaseHandle, LeaseKeeper, LeaseQueue, QueueMessage};

use crate::error::Result;
use crate::executor::ExecutionEngine;

/// One worker loop: receive under a lease, execute, delete.
///
/// Several workers may poll the same queue concurrently; the queue's lease
/// exclusivity is the only claim coordination between them.
pub struct AgentWorker {
    queue: Arc<dyn LeaseQueue>,
    engine: ExecutionEngine,
    config: AgentConfig,
}

impl AgentWorker {
    pub fn new(queue: Arc<dyn LeaseQueue>, engine: ExecutionEngine, config: AgentConfig) -> Self {
        Self {
            queue,
            engine,
            config,
        }
    }

    /// Main loop. Sleeps `receive_poll_secs` between attempts when the
    /// queue is empty; infra errors are logged and retried the same way.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            agent_id = self.config.id,
            queue = %self.config.queue,
            "agent worker started"
        );
        let idle = Duration::from_secs(self.config.receive_poll_secs);
        let lease = Duration::from_secs(self.config.lease_secs);

        loop {
            if *shutdown.borrow() {
                info!(agent_id = self.config.id, "agent worker shutting down");
                break;
            }

            let received = match self.queue.receive(&self.config.queue, lease) {
                Ok(received) => received,
                Err(e) => {
                    error!("queue receive failed: {e}");
                    None
                }
            };

            match received {
                Some((msg, handle)) => {
                    if let Err(e) = self.handle_message(msg, handle).await {
                        // The lease has been released or left to expire;
                        // redelivery picks the message back up.
                        error!("message handling failed: {e}");
                    }
                }
                None => {
                    tokio::select! {
                        _ = tokio::time::sleep(idle) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }
    }

    /// Process one received message to a terminal outcome.
    ///
    /// The heartbeat runs for the whole execution and is stopped only after
    /// the message has been deleted, so the message cannot surface on
    /// another agent mid-run.
    async fn handle_message(&self, msg: QueueMessage, handle: LeaseHandle) -> Result<()> {
        // Self-verification: a message tagged for a different queue was
        // misrouted upstream. Re-post it where it belongs and release this
        // copy instead of executing it here.
        if let Some(target) = msg.job_queue_name.as_deref() {
            if target != self.config.queue {
                warn!(
                    job_instance_id = msg.job_instance_id,
                    declared = target,
                    polled = %self.config.queue,
                    "message landed on the wrong queue, re-routing"
                );
                self.queue.enqueue(target, &msg)?;
                self.queue.delete(&handle)?;
                return Ok(());
            }
        }

        debug!(
            job_instance_id = msg.job_instance_id,
            job_id = msg.job_id,
            "message received"
        );

        let keeper = LeaseKeeper::spawn(
            Arc::clone(&self.queue),
            handle.clone(),
            Duration::from_secs(self.config.lease_secs),
            Duration::from_secs(self.config.heartbeat_secs),
        );

        let result = self.engine.process(&msg).await;

        // Delete on every deterministic outcome, then stop the heartbeat.
        // A reconciliation error leaves the message to lease expiry — the
        // retry path for infra failures.
        match &result {
            Ok(_) => {
                if let Err(e) = self.queue.delete(&handle) {
                    warn!(
                        message_id = handle.message_id(),
                        "could not delete message: {e}"
                    );
                }
            }
            Err(e) => {
                warn!(
                    message_id = handle.message_id(),
                    "leaving message for redelivery: {e}"
                );
            }
        }
        keeper.stop().await;

        result.map(|_| ())
    }
}
