use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// An executable unit. The `queued` / `in_process` / `has_error` flags are
/// denormalized status for the most recent instance and are maintained by
/// the scheduler and the execution engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
    /// Which [`JobQueue`] this job's instances are dispatched onto, if any.
    pub job_queue_id: Option<i64>,
    /// Blob key of the packaged code artifact in the package store.
    pub artifact_key: Option<String>,
    pub queued: bool,
    pub in_process: bool,
    pub has_error: bool,
}

/// A recurrence rule belonging to exactly one [`Job`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSchedule {
    pub id: i64,
    pub job_id: i64,
    pub enabled: bool,
    pub monday: bool,
    pub tuesday: bool,
    pub wednesday: bool,
    pub thursday: bool,
    pub friday: bool,
    pub saturday: bool,
    pub sunday: bool,
    /// HHMM lower bound of the daily window, e.g. 800.
    pub start_time: Option<u32>,
    /// HHMM upper bound of the daily window, e.g. 1700.
    pub stop_time: Option<u32>,
    /// Minimum hours between completed runs. `None` fires on every due tick.
    pub run_interval_hours: Option<i64>,
}

impl JobSchedule {
    /// Whether the day-of-week flag for `day` is set.
    pub fn runs_on(&self, day: Weekday) -> bool {
        match day {
            Weekday::Mon => self.monday,
            Weekday::Tue => self.tuesday,
            Weekday::Wed => self.wednesday,
            Weekday::Thu => self.thursday,
            Weekday::Fri => self.friday,
            Weekday::Sat => self.saturday,
            Weekday::Sun => self.sunday,
        }
    }
}

/// One execution attempt of a schedule.
///
/// Created by the scheduler with `in_process=true`; finalized exactly once by
/// the execution engine's reconciliation or by the scheduler's stuck sweep.
/// Terminal once `updated_at` is set and `in_process` is false.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInstance {
    pub id: i64,
    pub job_schedule_id: i64,
    pub in_process: bool,
    pub has_error: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<String>,
}

impl JobInstance {
    /// Whether this instance has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.updated_at.is_some() && !self.in_process
    }
}

/// Maps a logical queue name to the physical durable-queue resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobQueue {
    pub id: i64,
    pub name: String,
    /// Physical queue name worker agents poll.
    pub queue_name: String,
}
