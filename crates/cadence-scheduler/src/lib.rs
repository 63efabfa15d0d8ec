//! `cadence-scheduler`: interval-based background task scheduler.
//!
//! # Overview
//!
//! Task definitions and run history live behind a [`store::TaskStore`]. The
//! [`engine::Scheduler`] ticks (every 60 s by default): it first collects
//! runs whose job has returned, then checks every definition against its
//! latest run on this host and launches the ones that are due. Each launch
//! resolves a [`job::Job`] through the [`job::JobRegistry`] and runs it on its
//! own Tokio task. At most one run per definition is in flight at a time.
//!
//! # Interval types
//!
//! | Variant   | Next due                                        |
//! |-----------|-------------------------------------------------|
//! | `Minutes`…`Years` | Run start plus N units (weeks = 7 days) |
//! | `Startup` | Once per scheduler lifetime                     |
//! | `None`    | Never scheduled                                 |
//!
//! Due-ness is tracked per host. Several hosts sharing one store each run
//! every task independently.

pub mod clock;
pub mod db;
pub mod engine;
pub mod error;
pub mod interval;
pub mod job;
pub mod progress;
pub mod queue;
pub mod running;
pub mod sqlite;
pub mod store;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{LaunchOutcome, Scheduler, SchedulerOptions, TickSummary};
pub use error::{JobError, Result, SchedulerError};
pub use interval::next_due;
pub use job::{Job, JobFactory, JobRegistry};
pub use progress::{ProgressListener, ProgressSink};
pub use queue::RunQueue;
pub use running::{RunningSnapshot, RunningTask};
pub use sqlite::SqliteStore;
pub use store::{MemoryStore, TaskStore};
pub use types::{IntervalType, RunRecord, RunStatus, ScheduledTask, TaskProgress};
