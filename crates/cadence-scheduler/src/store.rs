use std::sync::Mutex;

use async_trait::async_trait;
use cadence_core::{HostId, TaskId};

use crate::error::{Result, SchedulerError};
use crate::types::{RunRecord, ScheduledTask};

/// Persistence collaborator for definitions and run history.
///
/// The scheduler only ever reads definitions; run records are upserted by id.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// All task definitions, enabled or not.
    async fn list_definitions(&self) -> Result<Vec<ScheduledTask>>;

    /// The most recently started run of `task_id` on `host`, if any.
    async fn latest_run(&self, task_id: &TaskId, host: &HostId) -> Result<Option<RunRecord>>;

    /// Insert or replace a run record, keyed by its id. Fails if no
    /// definition with the record's task id is stored.
    async fn save_run(&self, record: &RunRecord) -> Result<()>;
}

#[derive(Default)]
struct MemoryState {
    definitions: Vec<ScheduledTask>,
    runs: Vec<RunRecord>,
}

/// Volatile [`TaskStore`] for tests and embedding.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_definitions(definitions: impl IntoIterator<Item = ScheduledTask>) -> Self {
        let store = Self::new();
        for def in definitions {
            store.upsert_definition(def);
        }
        store
    }

    pub fn upsert_definition(&self, definition: ScheduledTask) {
        let mut state = self.state.lock().expect("memory store poisoned");
        match state.definitions.iter_mut().find(|d| d.id == definition.id) {
            Some(existing) => *existing = definition,
            None => state.definitions.push(definition),
        }
    }

    pub fn remove_definition(&self, task_id: &TaskId) -> bool {
        let mut state = self.state.lock().expect("memory store poisoned");
        let before = state.definitions.len();
        state.definitions.retain(|d| &d.id != task_id);
        state.runs.retain(|r| &r.task_id != task_id);
        state.definitions.len() != before
    }

    /// Every stored run, in insertion order.
    pub fn runs(&self) -> Vec<RunRecord> {
        self.state.lock().expect("memory store poisoned").runs.clone()
    }

    pub fn runs_for(&self, task_id: &TaskId) -> Vec<RunRecord> {
        self.state
            .lock()
            .expect("memory store poisoned")
            .runs
            .iter()
            .filter(|r| &r.task_id == task_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn list_definitions(&self) -> Result<Vec<ScheduledTask>> {
        Ok(self
            .state
            .lock()
            .expect("memory store poisoned")
            .definitions
            .clone())
    }

    async fn latest_run(&self, task_id: &TaskId, host: &HostId) -> Result<Option<RunRecord>> {
        let state = self.state.lock().expect("memory store poisoned");
        Ok(state
            .runs
            .iter()
            .filter(|r| &r.task_id == task_id && &r.host == host)
            .max_by_key(|r| r.started_at)
            .cloned())
    }

    async fn save_run(&self, record: &RunRecord) -> Result<()> {
        let mut state = self.state.lock().expect("memory store poisoned");
        if !state.definitions.iter().any(|d| d.id == record.task_id) {
            return Err(SchedulerError::Store(format!(
                "no definition for task {}",
                record.task_id
            )));
        }
        match state.runs.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => state.runs.push(record.clone()),
        }
        Ok(())
    }
}
