use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use tracing::{debug, info};

use crate::db::init_db;
use crate::error::{Result, StoreError};
use crate::types::{Job, JobInstance, JobQueue, JobSchedule};

/// Thread-safe typed access to job metadata.
///
/// Wraps a single SQLite connection in a `Mutex`. Each operation runs in its
/// own implicit transaction — the scheduler recomputes every decision from
/// durable state on the next tick, so no all-enclosing transaction is needed.
pub struct MetadataStore {
    db: Mutex<Connection>,
}

/// Day-of-week flags in Monday-first order, used when creating schedules.
pub type DayFlags = [bool; 7];

impl MetadataStore {
    /// Wrap an open connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    // -----------------------------------------------------------------------
    // Scheduler-side reads
    // -----------------------------------------------------------------------

    /// All schedules with their enabled flag set, in id order.
    pub fn list_enabled_schedules(&self) -> Result<Vec<JobSchedule>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, job_id, enabled, monday, tuesday, wednesday, thursday,
                    friday, saturday, sunday, start_time, stop_time, run_interval_hours
             FROM job_schedules WHERE enabled = 1 ORDER BY id",
        )?;
        let schedules = stmt
            .query_map([], row_to_schedule)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(schedules)
    }

    /// Whether any instance of `schedule_id` is in process without an error.
    ///
    /// This is the "no instance already in process" guard. An instance that
    /// is in process but already flagged errored does not block a new
    /// dispatch.
    pub fn has_active_instance(&self, schedule_id: i64) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM job_instances
             WHERE job_schedule_id = ?1 AND in_process = 1 AND has_error = 0",
            [schedule_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// The most recent instance of `schedule_id` by creation time, if any.
    pub fn latest_instance(&self, schedule_id: i64) -> Result<Option<JobInstance>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, job_schedule_id, in_process, has_error,
                    created_at, created_by, updated_at, updated_by
             FROM job_instances WHERE job_schedule_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT 1",
            [schedule_id],
            row_to_instance,
        ) {
            Ok(i) => Ok(Some(i)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    pub fn get_job(&self, id: i64) -> Result<Option<Job>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, name, enabled, job_queue_id, artifact_key,
                    queued, in_process, has_error
             FROM jobs WHERE id = ?1",
            [id],
            row_to_job,
        ) {
            Ok(j) => Ok(Some(j)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    pub fn get_queue(&self, id: i64) -> Result<Option<JobQueue>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, name, queue_name FROM job_queues WHERE id = ?1",
            [id],
            row_to_queue,
        ) {
            Ok(q) => Ok(Some(q)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    pub fn get_instance(&self, id: i64) -> Result<Option<JobInstance>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, job_schedule_id, in_process, has_error,
                    created_at, created_by, updated_at, updated_by
             FROM job_instances WHERE id = ?1",
            [id],
            row_to_instance,
        ) {
            Ok(i) => Ok(Some(i)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    // -----------------------------------------------------------------------
    // Scheduler-side writes
    // -----------------------------------------------------------------------

    /// Flag every instance that never finished within `stuck_timeout` as
    /// errored. Returns how many rows were swept.
    ///
    /// Bounds how long a crashed agent can hide a dead instance: anything
    /// with a NULL `updated_at` older than the cutoff is forced to a
    /// terminal error state with `updated_by = 'Scheduler'`.
    pub fn sweep_stuck_instances(
        &self,
        now: DateTime<Utc>,
        stuck_timeout: Duration,
    ) -> Result<usize> {
        let cutoff = (now - stuck_timeout).to_rfc3339();
        let db = self.db.lock().unwrap();
        let swept = db.execute(
            "UPDATE job_instances
             SET has_error = 1, in_process = 0, updated_at = ?1, updated_by = 'Scheduler'
             WHERE updated_at IS NULL AND has_error = 0 AND created_at <= ?2",
            rusqlite::params![now.to_rfc3339(), cutoff],
        )?;
        if swept > 0 {
            info!(count = swept, "stuck instances flagged as errored");
        }
        Ok(swept)
    }

    /// Create a new in-process instance for `schedule_id`. Returns its id.
    pub fn create_instance(
        &self,
        schedule_id: i64,
        now: DateTime<Utc>,
        created_by: &str,
    ) -> Result<i64> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO job_instances
             (job_schedule_id, in_process, has_error, created_at, created_by)
             VALUES (?1, 1, 0, ?2, ?3)",
            rusqlite::params![schedule_id, now.to_rfc3339(), created_by],
        )?;
        let id = db.last_insert_rowid();
        debug!(instance_id = id, schedule_id, "job instance created");
        Ok(id)
    }

    /// Finalize an instance. Both flags are written in one statement so the
    /// half-updated state (errored but still in process) cannot be observed.
    pub fn finish_instance(
        &self,
        id: i64,
        has_error: bool,
        now: DateTime<Utc>,
        updated_by: &str,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE job_instances
             SET in_process = 0, has_error = ?2, updated_at = ?3, updated_by = ?4
             WHERE id = ?1",
            rusqlite::params![id, has_error, now.to_rfc3339(), updated_by],
        )?;
        if n == 0 {
            return Err(StoreError::InstanceNotFound { id });
        }
        Ok(())
    }

    /// Set the job's denormalized queued flag after a successful enqueue.
    pub fn set_job_queued(&self, job_id: i64, queued: bool) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE jobs SET queued = ?2 WHERE id = ?1",
            rusqlite::params![job_id, queued],
        )?;
        if n == 0 {
            return Err(StoreError::JobNotFound { id: job_id });
        }
        Ok(())
    }

    /// Update the job's denormalized last-instance status flags.
    pub fn update_job_flags(
        &self,
        job_id: i64,
        queued: bool,
        in_process: bool,
        has_error: bool,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE jobs SET queued = ?2, in_process = ?3, has_error = ?4 WHERE id = ?1",
            rusqlite::params![job_id, queued, in_process, has_error],
        )?;
        if n == 0 {
            return Err(StoreError::JobNotFound { id: job_id });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Admin CRUD — used by the external UI and by tests
    // -----------------------------------------------------------------------

    pub fn create_queue(&self, name: &str, queue_name: &str) -> Result<JobQueue> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO job_queues (name, queue_name) VALUES (?1, ?2)",
            rusqlite::params![name, queue_name],
        )?;
        Ok(JobQueue {
            id: db.last_insert_rowid(),
            name: name.to_string(),
            queue_name: queue_name.to_string(),
        })
    }

    pub fn create_job(
        &self,
        name: &str,
        enabled: bool,
        job_queue_id: Option<i64>,
        artifact_key: Option<&str>,
    ) -> Result<Job> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO jobs (name, enabled, job_queue_id, artifact_key)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![name, enabled, job_queue_id, artifact_key],
        )?;
        Ok(Job {
            id: db.last_insert_rowid(),
            name: name.to_string(),
            enabled,
            job_queue_id,
            artifact_key: artifact_key.map(String::from),
            queued: false,
            in_process: false,
            has_error: false,
        })
    }

    /// Create a schedule. `days` is Monday-first.
    #[allow(clippy::too_many_arguments)]
    pub fn create_schedule(
        &self,
        job_id: i64,
        enabled: bool,
        days: DayFlags,
        start_time: Option<u32>,
        stop_time: Option<u32>,
        run_interval_hours: Option<i64>,
    ) -> Result<JobSchedule> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO job_schedules
             (job_id, enabled, monday, tuesday, wednesday, thursday, friday,
              saturday, sunday, start_time, stop_time, run_interval_hours)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                job_id,
                enabled,
                days[0],
                days[1],
                days[2],
                days[3],
                days[4],
                days[5],
                days[6],
                start_time,
                stop_time,
                run_interval_hours
            ],
        )?;
        Ok(JobSchedule {
            id: db.last_insert_rowid(),
            job_id,
            enabled,
            monday: days[0],
            tuesday: days[1],
            wednesday: days[2],
            thursday: days[3],
            friday: days[4],
            saturday: days[5],
            sunday: days[6],
            start_time,
            stop_time,
            run_interval_hours,
        })
    }

    /// Delete a job and everything referencing it: instances first, then
    /// schedules, then the job row itself.
    pub fn delete_job(&self, job_id: i64) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        tx.execute(
            "DELETE FROM job_instances WHERE job_schedule_id IN
             (SELECT id FROM job_schedules WHERE job_id = ?1)",
            [job_id],
        )?;
        tx.execute("DELETE FROM job_schedules WHERE job_id = ?1", [job_id])?;
        let n = tx.execute("DELETE FROM jobs WHERE id = ?1", [job_id])?;
        tx.commit()?;
        if n == 0 {
            return Err(StoreError::JobNotFound { id: job_id });
        }
        info!(job_id, "job deleted with schedules and instances");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row mappers
// ---------------------------------------------------------------------------

fn row_to_schedule(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobSchedule> {
    Ok(JobSchedule {
        id: row.get(0)?,
        job_id: row.get(1)?,
        enabled: row.get(2)?,
        monday: row.get(3)?,
        tuesday: row.get(4)?,
        wednesday: row.get(5)?,
        thursday: row.get(6)?,
        friday: row.get(7)?,
        saturday: row.get(8)?,
        sunday: row.get(9)?,
        start_time: row.get(10)?,
        stop_time: row.get(11)?,
        run_interval_hours: row.get(12)?,
    })
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    Ok(Job {
        id: row.get(0)?,
        name: row.get(1)?,
        enabled: row.get(2)?,
        job_queue_id: row.get(3)?,
        artifact_key: row.get(4)?,
        queued: row.get(5)?,
        in_process: row.get(6)?,
        has_error: row.get(7)?,
    })
}

fn row_to_queue(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobQueue> {
    Ok(JobQueue {
        id: row.get(0)?,
        name: row.get(1)?,
        queue_name: row.get(2)?,
    })
}

fn row_to_instance(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobInstance> {
    let created_raw: String = row.get(4)?;
    let updated_raw: Option<String> = row.get(6)?;
    Ok(JobInstance {
        id: row.get(0)?,
        job_schedule_id: row.get(1)?,
        in_process: row.get(2)?,
        has_error: row.get(3)?,
        created_at: parse_ts(4, created_raw)?,
        created_by: row.get(5)?,
        updated_at: updated_raw.map(|s| parse_ts(6, s)).transpose()?,
        updated_by: row.get(7)?,
    })
}

fn parse_ts(column: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}
