use std::sync::Arc;

use async_trait::async_trait;
use cadence_scheduler::{Job, JobError, ProgressSink, RunningTask, SqliteStore, TaskProgress};
use chrono::{Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Deletes finished run history older than the retention window.
pub struct HistoryPruneJob {
    store: Arc<SqliteStore>,
    retention_days: u32,
}

impl HistoryPruneJob {
    pub fn new(store: Arc<SqliteStore>, retention_days: u32) -> Self {
        Self {
            store,
            retention_days,
        }
    }
}

#[async_trait]
impl Job for HistoryPruneJob {
    async fn invoke(
        &self,
        task: Arc<RunningTask>,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> Result<(), JobError> {
        let cutoff = Utc::now() - Duration::days(i64::from(self.retention_days));
        progress
            .message(format!("pruning runs finished before {}", cutoff.format("%Y-%m-%d")))
            .await;

        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let removed = self
            .store
            .prune_history(cutoff)
            .map_err(|e| JobError::failed(e.to_string()))?;

        info!(task_id = %task.task_id(), removed, "history pruned");
        progress
            .report(TaskProgress::succeeded().with_message(format!("removed {removed} runs")))
            .await;
        Ok(())
    }
}
