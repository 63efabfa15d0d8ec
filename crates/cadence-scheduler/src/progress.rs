use std::sync::Arc;

use async_trait::async_trait;

use crate::running::RunningTask;
use crate::types::TaskProgress;

/// Receives every progress report a job makes. The scheduler implements this
/// to finalise runs that report a terminal status.
#[async_trait]
pub trait ProgressListener: Send + Sync {
    async fn on_progress(&self, task: &Arc<RunningTask>, progress: &TaskProgress);
}

/// Handed to a job so it can report how it is doing.
#[derive(Clone)]
pub struct ProgressSink {
    task: Arc<RunningTask>,
    listener: Arc<dyn ProgressListener>,
}

impl ProgressSink {
    pub fn new(task: Arc<RunningTask>, listener: Arc<dyn ProgressListener>) -> Self {
        Self { task, listener }
    }

    /// Record `progress` on the running task, then notify the listener.
    /// A finalised run keeps its terminal progress.
    pub async fn report(&self, progress: TaskProgress) {
        if !self.task.is_finalized() {
            self.task.set_progress(progress.clone());
        }
        self.listener.on_progress(&self.task, &progress).await;
    }

    pub async fn message(&self, message: impl Into<String>) {
        self.report(TaskProgress::running(message)).await;
    }

    pub async fn succeeded(&self) {
        self.report(TaskProgress::succeeded()).await;
    }

    pub async fn failed(&self, reason: impl Into<String>) {
        self.report(TaskProgress::error(reason)).await;
    }
}
