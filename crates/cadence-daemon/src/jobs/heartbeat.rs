use std::sync::Arc;

use async_trait::async_trait;
use cadence_core::HostId;
use cadence_scheduler::{Job, JobError, ProgressSink, RunningTask, TaskProgress};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Logs a liveness line and succeeds.
pub struct HeartbeatJob {
    host: HostId,
}

impl HeartbeatJob {
    pub fn new(host: HostId) -> Self {
        Self { host }
    }
}

#[async_trait]
impl Job for HeartbeatJob {
    async fn invoke(
        &self,
        task: Arc<RunningTask>,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> Result<(), JobError> {
        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        info!(host = %self.host, task_id = %task.task_id(), started_at = %task.started_at(), "heartbeat");
        progress
            .report(TaskProgress::succeeded().with_message(format!("alive on {}", self.host)))
            .await;
        Ok(())
    }
}
