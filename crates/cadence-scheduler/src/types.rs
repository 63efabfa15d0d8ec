use cadence_core::{HostId, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unit of a task's recurrence interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalType {
    /// Never scheduled.
    #[default]
    None,
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
    Years,
    /// Runs once per scheduler process lifetime.
    Startup,
}

impl std::fmt::Display for IntervalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IntervalType::None => "none",
            IntervalType::Minutes => "minutes",
            IntervalType::Hours => "hours",
            IntervalType::Days => "days",
            IntervalType::Weeks => "weeks",
            IntervalType::Months => "months",
            IntervalType::Years => "years",
            IntervalType::Startup => "startup",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for IntervalType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(IntervalType::None),
            "minutes" => Ok(IntervalType::Minutes),
            "hours" => Ok(IntervalType::Hours),
            "days" => Ok(IntervalType::Days),
            "weeks" => Ok(IntervalType::Weeks),
            "months" => Ok(IntervalType::Months),
            "years" => Ok(IntervalType::Years),
            "startup" => Ok(IntervalType::Startup),
            other => Err(format!("unknown interval type: {other}")),
        }
    }
}

/// A persisted task definition. Read-only from the scheduler's perspective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: TaskId,
    /// Human-readable label.
    pub name: String,
    /// Job implementation identifier, resolved through the [`JobRegistry`](crate::job::JobRegistry).
    pub job: String,
    pub enabled: bool,
    pub interval_type: IntervalType,
    /// Count of `interval_type` units; meaningless for `None` and `Startup`.
    pub interval: u32,
}

impl ScheduledTask {
    pub fn new(
        id: impl Into<TaskId>,
        name: impl Into<String>,
        job: impl Into<String>,
        interval_type: IntervalType,
        interval: u32,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            job: job.into(),
            enabled: true,
            interval_type,
            interval,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Eligible for periodic scheduling: switched on, with a real interval.
    pub fn is_enabled(&self) -> bool {
        self.enabled && self.interval > 0 && self.interval_type != IntervalType::None
    }
}

/// Status of a single execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    None,
    Running,
    Succeeded,
    Error,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Error)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::None => "none",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "none" => Ok(RunStatus::None),
            "running" => Ok(RunStatus::Running),
            "succeeded" => Ok(RunStatus::Succeeded),
            "error" => Ok(RunStatus::Error),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// One execution attempt of a task on one host.
///
/// Created with status `Running`, mutated while the attempt is in flight and
/// immutable once finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// UUIDv7, the upsert key.
    pub id: String,
    pub task_id: TaskId,
    pub host: HostId,
    pub started_at: DateTime<Utc>,
    /// `None` while running.
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    /// `None` until the run completes.
    pub next_due: Option<DateTime<Utc>>,
    /// Last progress message or failure reason.
    pub message: Option<String>,
}

impl RunRecord {
    /// Open a new attempt in the `Running` state.
    pub fn start(task_id: &TaskId, host: &HostId, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            task_id: task_id.clone(),
            host: host.clone(),
            started_at: now,
            finished_at: None,
            status: RunStatus::Running,
            next_due: None,
            message: None,
        }
    }

    /// An attempt that failed before any work was launched.
    ///
    /// `next_due` stays unset so the task is eligible again on the next tick.
    pub fn launch_failed(
        task_id: &TaskId,
        host: &HostId,
        now: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            finished_at: Some(now),
            status: RunStatus::Error,
            message: Some(reason.into()),
            ..Self::start(task_id, host, now)
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

/// Live progress of a running task, as last reported by its job.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskProgress {
    pub status: RunStatus,
    pub message: Option<String>,
}

impl TaskProgress {
    pub fn running(message: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Running,
            message: Some(message.into()),
        }
    }

    pub fn succeeded() -> Self {
        Self {
            status: RunStatus::Succeeded,
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Error,
            message: Some(message.into()),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
