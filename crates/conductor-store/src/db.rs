use rusqlite::Connection;

use crate::error::Result;

/// Initialise the metadata schema in `conn`.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout. The
/// index on `job_instances (job_schedule_id, created_at DESC)` backs the
/// scheduler's latest-instance and in-process guard queries, which run once
/// per enabled schedule per tick.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS job_queues (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT    NOT NULL UNIQUE,
            queue_name  TEXT    NOT NULL    -- physical queue agents poll
        ) STRICT;

        CREATE TABLE IF NOT EXISTS jobs (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            name          TEXT    NOT NULL,
            enabled       INTEGER NOT NULL DEFAULT 1,
            job_queue_id  INTEGER REFERENCES job_queues(id),
            artifact_key  TEXT,               -- blob key of the packaged code
            queued        INTEGER NOT NULL DEFAULT 0,
            in_process    INTEGER NOT NULL DEFAULT 0,
            has_error     INTEGER NOT NULL DEFAULT 0
        ) STRICT;

        CREATE TABLE IF NOT EXISTS job_schedules (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id              INTEGER NOT NULL REFERENCES jobs(id),
            enabled             INTEGER NOT NULL DEFAULT 1,
            monday              INTEGER NOT NULL DEFAULT 0,
            tuesday             INTEGER NOT NULL DEFAULT 0,
            wednesday           INTEGER NOT NULL DEFAULT 0,
            thursday            INTEGER NOT NULL DEFAULT 0,
            friday              INTEGER NOT NULL DEFAULT 0,
            saturday            INTEGER NOT NULL DEFAULT 0,
            sunday              INTEGER NOT NULL DEFAULT 0,
            start_time          INTEGER,        -- HHMM, e.g. 800
            stop_time           INTEGER,        -- HHMM, e.g. 1700
            run_interval_hours  INTEGER         -- NULL means every due tick
        ) STRICT;

        CREATE TABLE IF NOT EXISTS job_instances (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            job_schedule_id  INTEGER NOT NULL REFERENCES job_schedules(id),
            in_process       INTEGER NOT NULL DEFAULT 0,
            has_error        INTEGER NOT NULL DEFAULT 0,
            created_at       TEXT    NOT NULL,
            created_by       TEXT    NOT NULL,
            updated_at       TEXT,               -- NULL until finalized
            updated_by       TEXT
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_schedules_job
            ON job_schedules (job_id);
        CREATE INDEX IF NOT EXISTS idx_instances_schedule
            ON job_instances (job_schedule_id, created_at DESC);
        ",
    )?;
    Ok(())
}
