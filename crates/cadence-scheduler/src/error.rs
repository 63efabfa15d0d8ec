use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Any other persistence collaborator failure.
    #[error("Store error: {0}")]
    Store(String),

    /// The task definition names a job that is not registered.
    #[error("Unknown job: {job}")]
    UnknownJob { job: String },

    /// The job factory could not build an executable instance.
    #[error("Job {job} could not be constructed: {reason}")]
    JobConstruction { job: String, reason: String },

    /// The run queue already holds an execution of this task.
    #[error("Task already running: {task_id}")]
    AlreadyRunning { task_id: String },

    /// A persisted row could not be turned back into a domain value.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

impl SchedulerError {
    /// True for failures caused by the task definition itself rather than
    /// the environment; these are recorded as failed runs.
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self,
            SchedulerError::UnknownJob { .. } | SchedulerError::JobConstruction { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Outcome a job reports when its entry point fails.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("{0}")]
    Failed(String),

    /// The job stopped because the shutdown signal was raised.
    #[error("cancelled")]
    Cancelled,
}

impl JobError {
    pub fn failed(reason: impl Into<String>) -> Self {
        JobError::Failed(reason.into())
    }
}
