use std::sync::Mutex;

use async_trait::async_trait;
use cadence_core::{HostId, TaskId};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, instrument, warn};

use crate::db::init_db;
use crate::error::{Result, SchedulerError};
use crate::store::TaskStore;
use crate::types::{IntervalType, RunRecord, RunStatus, ScheduledTask};

/// SQLite-backed [`TaskStore`].
///
/// Wraps a single connection in a `Mutex`, like the rest of the workspace's
/// SQLite managers. Every statement is short so the lock is never held for
/// long.
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Take ownership of `conn` and make sure the schema exists.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    /// Insert a definition or replace the existing one with the same id.
    #[instrument(skip(self, task), fields(task_id = %task.id))]
    pub fn upsert_definition(&self, task: &ScheduledTask) -> Result<()> {
        let now = format_ts(Utc::now());
        let db = self.db.lock().expect("scheduler db poisoned");
        db.execute(
            "INSERT INTO scheduled_tasks
             (id, name, job, enabled, interval_type, interval_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                job = excluded.job,
                enabled = excluded.enabled,
                interval_type = excluded.interval_type,
                interval_count = excluded.interval_count,
                updated_at = excluded.updated_at",
            rusqlite::params![
                task.id.as_str(),
                task.name,
                task.job,
                task.enabled,
                task.interval_type.to_string(),
                task.interval,
                now
            ],
        )?;
        debug!("definition upserted");
        Ok(())
    }

    #[instrument(skip(self), fields(task_id = %task_id))]
    pub fn get_definition(&self, task_id: &TaskId) -> Result<Option<ScheduledTask>> {
        let db = self.db.lock().expect("scheduler db poisoned");
        let raw = db
            .query_row(
                "SELECT id, name, job, enabled, interval_type, interval_count
                 FROM scheduled_tasks WHERE id = ?1",
                [task_id.as_str()],
                read_definition,
            )
            .optional()?;
        raw.map(into_definition).transpose()
    }

    /// Delete a definition together with its run history. Returns whether a
    /// row was removed.
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub fn delete_definition(&self, task_id: &TaskId) -> Result<bool> {
        let db = self.db.lock().expect("scheduler db poisoned");
        db.execute(
            "DELETE FROM scheduled_task_history WHERE task_id = ?1",
            [task_id.as_str()],
        )?;
        let n = db.execute("DELETE FROM scheduled_tasks WHERE id = ?1", [task_id.as_str()])?;
        Ok(n > 0)
    }

    /// Runs of `task_id` on any host, newest first.
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub fn history(&self, task_id: &TaskId, limit: usize) -> Result<Vec<RunRecord>> {
        let db = self.db.lock().expect("scheduler db poisoned");
        let mut stmt = db.prepare(
            "SELECT id, task_id, host, started_at, finished_at, status, next_due, message
             FROM scheduled_task_history
             WHERE task_id = ?1
             ORDER BY started_at DESC
             LIMIT ?2",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let raws = stmt
            .query_map(rusqlite::params![task_id.as_str(), limit], read_run)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        raws.into_iter().map(into_record).collect()
    }

    /// Delete finished runs older than `before`. The newest run of each task
    /// on each host is always kept since it drives the due calculation.
    #[instrument(skip(self))]
    pub fn prune_history(&self, before: DateTime<Utc>) -> Result<usize> {
        let db = self.db.lock().expect("scheduler db poisoned");
        let n = db.execute(
            "DELETE FROM scheduled_task_history
             WHERE finished_at IS NOT NULL
               AND finished_at < ?1
               AND id NOT IN (
                   SELECT h.id FROM scheduled_task_history h
                   WHERE h.started_at = (
                       SELECT MAX(m.started_at) FROM scheduled_task_history m
                       WHERE m.task_id = h.task_id AND m.host = h.host
                   )
               )",
            [format_ts(before)],
        )?;
        debug!(removed = n, "history pruned");
        Ok(n)
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    #[instrument(skip(self))]
    async fn list_definitions(&self) -> Result<Vec<ScheduledTask>> {
        let db = self.db.lock().expect("scheduler db poisoned");
        let mut stmt = db.prepare(
            "SELECT id, name, job, enabled, interval_type, interval_count
             FROM scheduled_tasks ORDER BY created_at, id",
        )?;
        let raws = stmt
            .query_map([], read_definition)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        // One malformed row must not stall every other task.
        let tasks = raws
            .into_iter()
            .filter_map(|raw| match into_definition(raw) {
                Ok(task) => Some(task),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable task definition");
                    None
                }
            })
            .collect();
        Ok(tasks)
    }

    #[instrument(skip(self), fields(task_id = %task_id, host = %host))]
    async fn latest_run(&self, task_id: &TaskId, host: &HostId) -> Result<Option<RunRecord>> {
        let db = self.db.lock().expect("scheduler db poisoned");
        let raw = db
            .query_row(
                "SELECT id, task_id, host, started_at, finished_at, status, next_due, message
                 FROM scheduled_task_history
                 WHERE task_id = ?1 AND host = ?2
                 ORDER BY started_at DESC
                 LIMIT 1",
                [task_id.as_str(), host.as_str()],
                read_run,
            )
            .optional()?;
        raw.map(into_record).transpose()
    }

    #[instrument(skip(self, record), fields(task_id = %record.task_id, run_id = %record.id, status = %record.status))]
    async fn save_run(&self, record: &RunRecord) -> Result<()> {
        let db = self.db.lock().expect("scheduler db poisoned");
        db.execute(
            "INSERT INTO scheduled_task_history
             (id, task_id, host, started_at, finished_at, status, next_due, message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                finished_at = excluded.finished_at,
                status = excluded.status,
                next_due = excluded.next_due,
                message = excluded.message",
            rusqlite::params![
                record.id,
                record.task_id.as_str(),
                record.host.as_str(),
                format_ts(record.started_at),
                record.finished_at.map(format_ts),
                record.status.to_string(),
                record.next_due.map(format_ts),
                record.message,
            ],
        )?;
        Ok(())
    }
}

// --- row mapping -------------------------------------------------------------

type RawDefinition = (String, String, String, bool, String, u32);

type RawRun = (
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
);

fn read_definition(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawDefinition> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn read_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRun> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn into_definition(raw: RawDefinition) -> Result<ScheduledTask> {
    let (id, name, job, enabled, interval_type, interval) = raw;
    let interval_type: IntervalType = interval_type
        .parse()
        .map_err(|e: String| SchedulerError::InvalidRecord(format!("task {id}: {e}")))?;
    Ok(ScheduledTask {
        id: TaskId(id),
        name,
        job,
        enabled,
        interval_type,
        interval,
    })
}

fn into_record(raw: RawRun) -> Result<RunRecord> {
    let (id, task_id, host, started_at, finished_at, status, next_due, message) = raw;
    let status: RunStatus = status
        .parse()
        .map_err(|e: String| SchedulerError::InvalidRecord(format!("run {id}: {e}")))?;
    Ok(RunRecord {
        started_at: parse_ts(&started_at)?,
        finished_at: finished_at.as_deref().map(parse_ts).transpose()?,
        next_due: next_due.as_deref().map(parse_ts).transpose()?,
        id,
        task_id: TaskId(task_id),
        host: HostId(host),
        status,
        message,
    })
}

/// Fixed-width RFC 3339 so lexical order matches chronological order.
/// Instants past year 9999 are clamped to the last representable second.
fn format_ts(ts: DateTime<Utc>) -> String {
    let ceiling = Utc
        .with_ymd_and_hms(9999, 12, 31, 23, 59, 59)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    ts.min(ceiling).to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SchedulerError::InvalidRecord(format!("bad timestamp {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store_with(task: &ScheduledTask) -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_definition(task).unwrap();
        store
    }

    fn finished(task: &TaskId, host: &HostId, start: DateTime<Utc>) -> RunRecord {
        let mut rec = RunRecord::start(task, host, start);
        rec.finished_at = Some(start + Duration::seconds(1));
        rec.status = RunStatus::Succeeded;
        rec.next_due = Some(start + Duration::hours(1));
        rec
    }

    #[tokio::test]
    async fn definitions_round_trip_and_upsert() {
        let mut task = ScheduledTask::new("sync", "Sync", "heartbeat", IntervalType::Hours, 2);
        let store = store_with(&task);

        task.enabled = false;
        task.interval = 6;
        store.upsert_definition(&task).unwrap();

        let all = store.list_definitions().await.unwrap();
        assert_eq!(all, vec![task.clone()]);
        assert_eq!(store.get_definition(&task.id).unwrap(), Some(task));
    }

    #[tokio::test]
    async fn latest_run_picks_newest_start_on_host() {
        let task = ScheduledTask::new("sync", "Sync", "heartbeat", IntervalType::Hours, 1);
        let store = store_with(&task);
        let here = HostId::from("here");
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();

        store.save_run(&finished(&task.id, &here, t0)).await.unwrap();
        let newer = RunRecord::start(&task.id, &here, t0 + Duration::hours(1));
        store.save_run(&newer).await.unwrap();
        store
            .save_run(&finished(&task.id, &HostId::from("there"), t0 + Duration::hours(2)))
            .await
            .unwrap();

        let latest = store.latest_run(&task.id, &here).await.unwrap().unwrap();
        assert_eq!(latest, newer);
        assert!(!latest.is_finished());
    }

    #[tokio::test]
    async fn save_run_updates_in_place() {
        let task = ScheduledTask::new("sync", "Sync", "heartbeat", IntervalType::Minutes, 5);
        let store = store_with(&task);
        let host = HostId::localhost();
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();

        let mut rec = RunRecord::start(&task.id, &host, start);
        store.save_run(&rec).await.unwrap();
        rec.finished_at = Some(start + Duration::seconds(30));
        rec.status = RunStatus::Error;
        rec.message = Some("boom".into());
        rec.next_due = Some(start + Duration::minutes(5));
        store.save_run(&rec).await.unwrap();

        let history = store.history(&task.id, 10).unwrap();
        assert_eq!(history, vec![rec]);
    }

    #[tokio::test]
    async fn far_future_next_due_is_clamped() {
        let task = ScheduledTask::new("sync", "Sync", "heartbeat", IntervalType::Years, 1);
        let store = store_with(&task);
        let mut rec = finished(&task.id, &HostId::localhost(), Utc::now());
        rec.next_due = Some(DateTime::<Utc>::MAX_UTC);
        store.save_run(&rec).await.unwrap();

        let back = store
            .latest_run(&task.id, &HostId::localhost())
            .await
            .unwrap()
            .unwrap();
        assert!(back.next_due.unwrap() > Utc::now() + Duration::days(365 * 1000));
    }

    #[test]
    fn prune_keeps_latest_run_per_host() {
        let task = ScheduledTask::new("sync", "Sync", "heartbeat", IntervalType::Days, 1);
        let store = store_with(&task);
        let host = HostId::localhost();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            for day in 0..5 {
                store
                    .save_run(&finished(&task.id, &host, t0 + Duration::days(day)))
                    .await
                    .unwrap();
            }
        });

        let removed = store.prune_history(t0 + Duration::days(30)).unwrap();
        assert_eq!(removed, 4);
        let left = store.history(&task.id, 10).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].started_at, t0 + Duration::days(4));
    }

    #[test]
    fn delete_definition_removes_history() {
        let task = ScheduledTask::new("sync", "Sync", "heartbeat", IntervalType::Days, 1);
        let store = store_with(&task);
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(store.save_run(&finished(&task.id, &HostId::localhost(), Utc::now())))
            .unwrap();

        assert!(store.delete_definition(&task.id).unwrap());
        assert!(!store.delete_definition(&task.id).unwrap());
        assert!(store.history(&task.id, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_for_unknown_definition_is_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        let rec = RunRecord::start(&"ghost".into(), &HostId::localhost(), Utc::now());
        assert!(matches!(
            store.save_run(&rec).await.unwrap_err(),
            SchedulerError::Database(_)
        ));
    }

    #[test]
    fn unknown_interval_type_is_invalid_record() {
        let err = into_definition((
            "t".into(),
            "T".into(),
            "noop".into(),
            true,
            "fortnights".into(),
            1,
        ))
        .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidRecord(_)));
    }
}
