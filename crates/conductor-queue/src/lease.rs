use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::queue::LeaseQueue;
use crate::types::LeaseHandle;

/// Background task that renews a message lease while its job executes.
///
/// The cadence must be strictly shorter than the lease so at least one
/// renewal lands before the prior lease would expire, even allowing for one
/// missed tick. Exactly one keeper runs per in-flight message; it is stopped
/// only after the message has been deleted (or the attempt abandoned), so
/// the message can never surface mid-execution.
pub struct LeaseKeeper {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl LeaseKeeper {
    /// Spawn the renewal task for `handle`.
    pub fn spawn(
        queue: Arc<dyn LeaseQueue>,
        handle: LeaseHandle,
        lease: Duration,
        cadence: Duration,
    ) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            // First renewal is due one cadence in — receive already set the
            // initial lease.
            let start = tokio::time::Instant::now() + cadence;
            let mut ticker = tokio::time::interval_at(start, cadence);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match queue.extend_lease(&handle, lease) {
                            Ok(()) => {
                                debug!(message_id = handle.message_id(), "heartbeat renewed lease");
                            }
                            Err(e) => {
                                // Lease already gone — renewing can only
                                // re-expose a message someone else owns now.
                                warn!(
                                    message_id = handle.message_id(),
                                    "heartbeat stopped: {e}"
                                );
                                break;
                            }
                        }
                    }
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            debug!(message_id = handle.message_id(), "heartbeat stopped");
                            break;
                        }
                    }
                }
            }
        });

        Self { stop_tx, task }
    }

    /// Signal the renewal task to stop and wait for it to finish.
    ///
    /// Call after `delete` has succeeded — deletion is terminal, so stopping
    /// afterwards only frees the task.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.task.await;
    }
}
