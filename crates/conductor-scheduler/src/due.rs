use chrono::{DateTime, Datelike, Utc};

use conductor_core::time::within_window;
use conductor_store::{JobInstance, JobSchedule};

/// Day and time-window gates for `schedule` at `now`.
///
/// The day-of-week flag is authoritative; the HHMM window only restricts
/// when both bounds are set (inclusive at both ends).
pub fn in_schedule_window(schedule: &JobSchedule, now: DateTime<Utc>) -> bool {
    schedule.runs_on(now.weekday())
        && within_window(now, schedule.start_time, schedule.stop_time)
}

/// The interval guard, evaluated against the most recent instance.
///
/// - No prior instance: due.
/// - Prior instance still unfinished (`updated_at` unset): not due — it is
///   either running or waiting for the stuck sweep.
/// - Prior instance completed, no interval configured: due every tick.
/// - Otherwise: due once the configured hours have elapsed since the prior
///   instance was finalized.
pub fn interval_elapsed(
    schedule: &JobSchedule,
    latest: Option<&JobInstance>,
    now: DateTime<Utc>,
) -> bool {
    let Some(latest) = latest else {
        return true;
    };
    let Some(updated_at) = latest.updated_at else {
        return false;
    };
    let Some(hours) = schedule.run_interval_hours else {
        return true;
    };
    let elapsed_minutes = (now - updated_at).num_minutes();
    elapsed_minutes >= hours * 60
}
