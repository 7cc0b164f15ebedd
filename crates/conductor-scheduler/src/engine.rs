use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use tokio::sync::watch;
use tracing::{error, info, warn};

use conductor_core::config::SchedulerConfig;
use conductor_queue::{LeaseQueue, QueueMessage};
use conductor_store::{JobSchedule, MetadataStore};

use crate::due::{in_schedule_window, interval_elapsed};
use crate::error::Result;

/// What one tick did. Returned for logging and tests.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Instances force-failed by the stuck sweep.
    pub swept: usize,
    /// Instances created and enqueued.
    pub dispatched: usize,
    /// Due schedules skipped because their job was disabled or missing.
    pub skipped: usize,
    /// Instances created whose enqueue failed (marked errored immediately).
    pub enqueue_failures: usize,
}

/// Core scheduler: evaluates recurrence and feeds the lease queue.
///
/// Clients for the store and the queue are injected pre-built; the engine
/// owns no lazily-constructed state.
pub struct SchedulerEngine {
    store: Arc<MetadataStore>,
    queue: Arc<dyn LeaseQueue>,
    config: SchedulerConfig,
}

impl SchedulerEngine {
    pub fn new(
        store: Arc<MetadataStore>,
        queue: Arc<dyn LeaseQueue>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            queue,
            config,
        }
    }

    /// Main loop. A fixed delay separates ticks, so a slow tick pushes the
    /// next one out rather than overlapping it.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval_secs,
            "scheduler engine started"
        );
        let delay = StdDuration::from_secs(self.config.poll_interval_secs);

        loop {
            match self.tick(Utc::now()) {
                Ok(report) if report.dispatched > 0 || report.swept > 0 => {
                    info!(
                        dispatched = report.dispatched,
                        swept = report.swept,
                        skipped = report.skipped,
                        "tick complete"
                    );
                }
                Ok(_) => {}
                // Tick aborted; durable state is untouched mid-decision, so
                // the next tick re-evaluates everything.
                Err(e) => error!("scheduler tick failed: {e}"),
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run one tick at `now`: sweep stuck instances, then evaluate and
    /// dispatch every due schedule.
    pub fn tick(&self, now: chrono::DateTime<Utc>) -> Result<TickReport> {
        let mut report = TickReport {
            swept: self
                .store
                .sweep_stuck_instances(now, Duration::hours(self.config.stuck_timeout_hours))?,
            ..TickReport::default()
        };

        for schedule in self.store.list_enabled_schedules()? {
            if !self.is_due(&schedule, now)? {
                continue;
            }
            self.dispatch(&schedule, now, &mut report)?;
        }
        Ok(report)
    }

    /// All four gates, in order: day, window, in-process guard, interval.
    fn is_due(&self, schedule: &JobSchedule, now: chrono::DateTime<Utc>) -> Result<bool> {
        if !in_schedule_window(schedule, now) {
            return Ok(false);
        }
        if self.store.has_active_instance(schedule.id)? {
            return Ok(false);
        }
        let latest = self.store.latest_instance(schedule.id)?;
        Ok(interval_elapsed(schedule, latest.as_ref(), now))
    }

    /// Create the instance, then send the message referencing it.
    ///
    /// The instance row is persisted before the send, so a send failure can
    /// be reconciled immediately: the instance is marked errored and will
    /// never be treated as "due" again. A failed enqueue is terminal for
    /// that instance, not retried in-loop.
    fn dispatch(
        &self,
        schedule: &JobSchedule,
        now: chrono::DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<()> {
        let job = match self.store.get_job(schedule.job_id)? {
            Some(job) if job.enabled => job,
            Some(job) => {
                info!(job_id = job.id, schedule_id = schedule.id, "job disabled; skipping");
                report.skipped += 1;
                return Ok(());
            }
            None => {
                warn!(
                    job_id = schedule.job_id,
                    schedule_id = schedule.id,
                    "schedule references a missing job; skipping"
                );
                report.skipped += 1;
                return Ok(());
            }
        };

        let queue_name = self.resolve_queue_name(job.job_queue_id)?;
        let instance_id = self.store.create_instance(schedule.id, now, "Scheduler")?;

        let message = QueueMessage {
            job_instance_id: instance_id,
            job_id: job.id,
            queued_at: now,
            job_environment: self.config.environment.clone(),
            job_queue_name: Some(queue_name.clone()),
        };

        match self.queue.enqueue(&queue_name, &message) {
            Ok(()) => {
                self.store.set_job_queued(job.id, true)?;
                info!(
                    job_id = job.id,
                    instance_id,
                    queue = %queue_name,
                    "job instance dispatched"
                );
                report.dispatched += 1;
            }
            Err(e) => {
                error!(job_id = job.id, instance_id, "enqueue failed: {e}");
                self.store.finish_instance(instance_id, true, now, "Scheduler")?;
                report.enqueue_failures += 1;
            }
        }
        Ok(())
    }

    /// Physical queue for the job, falling back to the configured default
    /// when the job has no (or a dangling) JobQueue reference.
    fn resolve_queue_name(&self, job_queue_id: Option<i64>) -> Result<String> {
        if let Some(id) = job_queue_id {
            if let Some(queue) = self.store.get_queue(id)? {
                return Ok(queue.queue_name);
            }
            warn!(job_queue_id = id, "job queue not found; using default");
        }
        Ok(self.config.default_queue.clone())
    }
}
