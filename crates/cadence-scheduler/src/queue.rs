use std::sync::Arc;

use cadence_core::TaskId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::{Result, SchedulerError};
use crate::running::RunningTask;
use crate::types::{RunRecord, ScheduledTask};

/// The set of runs currently in flight, at most one per task definition.
///
/// Safe for concurrent use from the tick loop, the event path and job
/// completion callbacks.
#[derive(Default)]
pub struct RunQueue {
    tasks: DashMap<TaskId, Arc<RunningTask>>,
}

impl RunQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.tasks.contains_key(task_id)
    }

    /// Insert a new running task. The membership test and the insert are a
    /// single atomic step, so two callers can never both succeed for the same
    /// definition.
    pub fn add(&self, definition: ScheduledTask, record: RunRecord) -> Result<Arc<RunningTask>> {
        match self.tasks.entry(definition.id.clone()) {
            Entry::Occupied(_) => Err(SchedulerError::AlreadyRunning {
                task_id: definition.id.to_string(),
            }),
            Entry::Vacant(slot) => {
                let task = Arc::new(RunningTask::new(definition, record));
                slot.insert(Arc::clone(&task));
                Ok(task)
            }
        }
    }

    /// Remove whatever is queued under `task_id`. Idempotent.
    pub fn remove(&self, task_id: &TaskId) -> Option<Arc<RunningTask>> {
        self.tasks.remove(task_id).map(|(_, task)| task)
    }

    /// Remove `task` only if it is still the queued instance for its id, so a
    /// late completion callback never evicts a newer run.
    pub fn remove_task(&self, task: &Arc<RunningTask>) -> bool {
        self.tasks
            .remove_if(task.task_id(), |_, queued| Arc::ptr_eq(queued, task))
            .is_some()
    }

    pub fn get(&self, task_id: &TaskId) -> Option<Arc<RunningTask>> {
        self.tasks.get(task_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Point-in-time copy, safe to iterate while the queue keeps changing.
    pub fn snapshot(&self) -> Vec<Arc<RunningTask>> {
        self.tasks.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
