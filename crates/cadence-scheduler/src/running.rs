use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use cadence_core::TaskId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::interval::next_due;
use crate::types::{RunRecord, RunStatus, ScheduledTask, TaskProgress};

/// Live execution context of one in-flight run.
///
/// Shared between the run queue, the job (through its progress sink) and the
/// launch wrapper. Finalisation happens at most once no matter which
/// completion path gets there first.
pub struct RunningTask {
    definition: ScheduledTask,
    record: Mutex<RunRecord>,
    progress: Mutex<TaskProgress>,
    handle: Mutex<Option<JoinHandle<()>>>,
    finalized: AtomicBool,
}

impl RunningTask {
    pub fn new(definition: ScheduledTask, record: RunRecord) -> Self {
        let progress = TaskProgress {
            status: record.status,
            message: None,
        };
        Self {
            definition,
            record: Mutex::new(record),
            progress: Mutex::new(progress),
            handle: Mutex::new(None),
            finalized: AtomicBool::new(false),
        }
    }

    pub fn definition(&self) -> &ScheduledTask {
        &self.definition
    }

    pub fn task_id(&self) -> &TaskId {
        &self.definition.id
    }

    /// Copy of the run record in its current state.
    pub fn record(&self) -> RunRecord {
        self.record.lock().expect("run record poisoned").clone()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.record.lock().expect("run record poisoned").started_at
    }

    pub fn progress(&self) -> TaskProgress {
        self.progress.lock().expect("progress poisoned").clone()
    }

    pub(crate) fn set_progress(&self, progress: TaskProgress) {
        *self.progress.lock().expect("progress poisoned") = progress;
    }

    /// Attach the handle of the unit of work executing this run.
    pub(crate) fn attach(&self, handle: JoinHandle<()>) {
        *self.handle.lock().expect("task handle poisoned") = Some(handle);
    }

    /// True when there is no unit of work, or it has already returned.
    pub fn has_finished(&self) -> bool {
        match self.handle.lock().expect("task handle poisoned").as_ref() {
            Some(handle) => handle.is_finished(),
            None => true,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    /// Close the run record exactly once.
    ///
    /// Sets finish time, terminal status and the next due time (computed from
    /// the run's start). Returns the finished record to persist, or `None` if
    /// another completion path already finalised this run.
    pub(crate) fn try_finalize(
        &self,
        status: RunStatus,
        now: DateTime<Utc>,
        message: Option<String>,
    ) -> Option<RunRecord> {
        if self
            .finalized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        let mut record = self.record.lock().expect("run record poisoned");
        record.finished_at = Some(now);
        record.status = status;
        record.next_due = Some(next_due(
            record.started_at,
            self.definition.interval_type,
            self.definition.interval,
        ));
        if message.is_some() {
            record.message = message.clone();
        }

        let mut progress = self.progress.lock().expect("progress poisoned");
        progress.status = status;
        if message.is_some() {
            progress.message = message;
        }

        Some(record.clone())
    }

    pub fn snapshot(&self) -> RunningSnapshot {
        RunningSnapshot {
            task_id: self.definition.id.clone(),
            name: self.definition.name.clone(),
            job: self.definition.job.clone(),
            started_at: self.started_at(),
            progress: self.progress(),
        }
    }
}

impl std::fmt::Debug for RunningTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningTask")
            .field("task_id", &self.definition.id)
            .field("finalized", &self.is_finalized())
            .finish()
    }
}

/// Point-in-time view of a running task for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct RunningSnapshot {
    pub task_id: TaskId,
    pub name: String,
    pub job: String,
    pub started_at: DateTime<Utc>,
    pub progress: TaskProgress,
}
