use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the definition and run history tables (idempotent) plus the index
/// backing the "latest run for task on host" lookup done on every tick.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS scheduled_tasks (
            id              TEXT    NOT NULL PRIMARY KEY,
            name            TEXT    NOT NULL,
            job             TEXT    NOT NULL,
            enabled         INTEGER NOT NULL DEFAULT 1,
            interval_type   TEXT    NOT NULL DEFAULT 'none',
            interval_count  INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT    NOT NULL,
            updated_at      TEXT    NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS scheduled_task_history (
            id           TEXT NOT NULL PRIMARY KEY,   -- UUIDv7
            task_id      TEXT NOT NULL REFERENCES scheduled_tasks(id) ON DELETE CASCADE,
            host         TEXT NOT NULL,
            started_at   TEXT NOT NULL,               -- RFC 3339, microseconds, UTC
            finished_at  TEXT,
            status       TEXT NOT NULL DEFAULT 'running',
            next_due     TEXT,
            message      TEXT
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_task_history_latest
            ON scheduled_task_history (task_id, host, started_at DESC);
        ",
    )?;
    Ok(())
}
