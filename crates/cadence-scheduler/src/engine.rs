use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cadence_core::HostId;
use cadence_events::{EntityEvent, EntityKind, EventBus, EventError, EventKind, Subscriber, Subscription};
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{JobError, Result, SchedulerError};
use crate::job::{Job, JobRegistry};
use crate::progress::{ProgressListener, ProgressSink};
use crate::queue::RunQueue;
use crate::running::{RunningSnapshot, RunningTask};
use crate::store::TaskStore;
use crate::types::{IntervalType, RunRecord, RunStatus, ScheduledTask, TaskProgress};

/// Subscription name used on the event bus.
pub const SUBSCRIPTION_NAME: &str = "scheduler";

/// Default driver tick period.
pub const DEFAULT_TICK: Duration = Duration::from_secs(60);

/// Construction-time inputs of a [`Scheduler`].
#[derive(Clone)]
pub struct SchedulerOptions {
    /// Identity that scopes this instance's run history.
    pub host: HostId,
    pub tick: Duration,
    pub clock: Arc<dyn Clock>,
}

impl SchedulerOptions {
    pub fn new(host: HostId) -> Self {
        Self {
            host,
            tick: DEFAULT_TICK,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }
}

/// What one driver tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Runs finalised by reconciliation.
    pub collected: usize,
    pub launched: usize,
    /// Due tasks that could not be launched (definition errors, store failures).
    pub failed: usize,
    /// True when reading definitions or history failed and the tick stopped.
    pub abandoned: bool,
}

/// Result of a single due-check-and-launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    NotDue,
    Launched,
    /// The job could not be resolved; a failed run record was written instead.
    Rejected,
}

/// The scheduler driver.
///
/// Cheap to clone; every clone drives the same run queue.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    store: Arc<dyn TaskStore>,
    registry: Arc<JobRegistry>,
    clock: Arc<dyn Clock>,
    host: HostId,
    tick: Duration,
    started_at: DateTime<Utc>,
    queue: RunQueue,
    /// Serialises ticks and event-triggered launches.
    gate: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: Arc<JobRegistry>,
        options: SchedulerOptions,
    ) -> Self {
        let started_at = options.clock.now();
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                registry,
                clock: options.clock,
                host: options.host,
                tick: options.tick,
                started_at,
                queue: RunQueue::new(),
                gate: tokio::sync::Mutex::new(()),
                cancel: CancellationToken::new(),
                loop_handle: Mutex::new(None),
            }),
        }
    }

    pub fn host(&self) -> &HostId {
        &self.inner.host
    }

    /// When this instance was constructed; drives `Startup` tasks.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    /// The process-lifetime shutdown signal handed to every job.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Spawn the tick loop. The first tick fires immediately. Calling this
    /// twice, or after [`stop`](Self::stop), does nothing.
    pub fn start(&self) {
        if self.inner.cancel.is_cancelled() {
            warn!("scheduler already stopped; not starting");
            return;
        }
        let mut slot = self.inner.loop_handle.lock().expect("loop handle poisoned");
        if slot.is_some() {
            debug!("scheduler already started");
            return;
        }

        let inner = Arc::clone(&self.inner);
        let period = inner.tick;
        *slot = Some(tokio::spawn(async move {
            info!(host = %inner.host, tick_secs = period.as_secs(), "scheduler started");
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    // Shutdown wins over a tick that became ready at the same time.
                    biased;
                    _ = inner.cancel.cancelled() => break,
                    _ = interval.tick() => {
                        inner.tick().await;
                    }
                }
            }
            info!("scheduler loop exited");
        }));
    }

    /// Raise the shutdown signal and wait for the tick loop to exit. In-flight
    /// jobs observe the signal but are not awaited.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();
        let handle = self
            .inner
            .loop_handle
            .lock()
            .expect("loop handle poisoned")
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "scheduler loop ended abnormally");
            }
        }
        info!(in_flight = self.inner.queue.len(), "scheduler stopped");
    }

    /// Run one reconcile-then-evaluate pass.
    pub async fn tick(&self) -> TickSummary {
        self.inner.tick().await
    }

    /// Finalise every queued run whose unit of work has returned.
    pub async fn collect(&self) -> usize {
        let _gate = self.inner.gate.lock().await;
        self.inner.collect().await
    }

    /// Due-check for one definition.
    pub async fn should_run_now(&self, task: &ScheduledTask, ignore_schedule: bool) -> Result<bool> {
        self.inner.should_run_now(task, ignore_schedule).await
    }

    /// Due-check and, if due, launch.
    pub async fn run_if_due(
        &self,
        task: &ScheduledTask,
        ignore_schedule: bool,
    ) -> Result<LaunchOutcome> {
        let _gate = self.inner.gate.lock().await;
        self.inner.run_if_due(task, ignore_schedule).await
    }

    pub fn is_running(&self, task: &ScheduledTask) -> bool {
        self.inner.queue.contains(&task.id)
    }

    /// Point-in-time view of in-flight runs, oldest first.
    pub fn running(&self) -> Vec<RunningSnapshot> {
        let mut runs: Vec<_> = self
            .inner
            .queue
            .snapshot()
            .iter()
            .map(|task| task.snapshot())
            .collect();
        runs.sort_by_key(|run| run.started_at);
        runs
    }

    /// Register for task definition updates on `bus`.
    pub fn subscribe(&self, bus: &EventBus) {
        bus.subscribe(Subscription::new(
            SUBSCRIPTION_NAME,
            EntityKind::TaskDefinition,
            EventKind::Updated,
            Arc::new(self.clone()),
        ));
    }
}

impl SchedulerInner {
    async fn tick(self: &Arc<Self>) -> TickSummary {
        // Held until every launch is queued, so an event-triggered launch
        // cannot interleave between a due check and its enqueue.
        let _gate = self.gate.lock().await;
        let mut summary = TickSummary {
            collected: self.collect().await,
            ..TickSummary::default()
        };

        let due = match self.due_definitions().await {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "tick abandoned");
                summary.abandoned = true;
                return summary;
            }
        };

        for task in due {
            match self.launch(&task).await {
                Ok(LaunchOutcome::Launched) => summary.launched += 1,
                Ok(LaunchOutcome::Rejected) => summary.failed += 1,
                Ok(LaunchOutcome::NotDue) => {}
                Err(e) => {
                    error!(task_id = %task.id, error = %e, "launch failed");
                    summary.failed += 1;
                }
            }
        }

        debug!(
            collected = summary.collected,
            launched = summary.launched,
            failed = summary.failed,
            "tick complete"
        );
        summary
    }

    /// Every definition due right now. Any read failure abandons the whole
    /// pass so nothing is launched from a partial view.
    async fn due_definitions(&self) -> Result<Vec<ScheduledTask>> {
        let mut due = Vec::new();
        for task in self.store.list_definitions().await? {
            if self.should_run_now(&task, false).await? {
                due.push(task);
            }
        }
        Ok(due)
    }

    async fn collect(&self) -> usize {
        let mut collected = 0;
        for task in self.queue.snapshot() {
            if !task.has_finished() {
                continue;
            }
            if self.finalize(&task, RunStatus::Succeeded, None).await {
                collected += 1;
            } else {
                // Another path finalised it and has already persisted.
                self.queue.remove_task(&task);
            }
        }
        collected
    }

    async fn should_run_now(&self, task: &ScheduledTask, ignore_schedule: bool) -> Result<bool> {
        if !task.enabled || (!ignore_schedule && !task.is_enabled()) {
            return Ok(false);
        }
        if self.queue.contains(&task.id) {
            debug!(task_id = %task.id, "already running");
            return Ok(false);
        }

        if ignore_schedule {
            return Ok(true);
        }

        let latest = self.store.latest_run(&task.id, &self.host).await?;
        let Some(record) = latest else {
            return Ok(true);
        };
        let Some(next_due) = record.next_due else {
            return Ok(true);
        };

        let due = match task.interval_type {
            IntervalType::Startup => record
                .finished_at
                .is_some_and(|finished| self.started_at > finished),
            _ => self.clock.now() > next_due,
        };
        debug!(task_id = %task.id, due, %next_due, "due check");
        Ok(due)
    }

    async fn run_if_due(
        self: &Arc<Self>,
        task: &ScheduledTask,
        ignore_schedule: bool,
    ) -> Result<LaunchOutcome> {
        if !self.should_run_now(task, ignore_schedule).await? {
            return Ok(LaunchOutcome::NotDue);
        }
        self.launch(task).await
    }

    /// Open a run record, enqueue the running task and spawn the job.
    /// Callers hold the gate.
    async fn launch(self: &Arc<Self>, task: &ScheduledTask) -> Result<LaunchOutcome> {
        let now = self.clock.now();

        let job = match self.registry.resolve(&task.job) {
            Ok(job) => job,
            Err(e) if e.is_definition_error() => {
                warn!(task_id = %task.id, job = %task.job, error = %e, "task rejected");
                let record = RunRecord::launch_failed(&task.id, &self.host, now, e.to_string());
                self.store.save_run(&record).await?;
                return Ok(LaunchOutcome::Rejected);
            }
            Err(e) => return Err(e),
        };

        let record = RunRecord::start(&task.id, &self.host, now);
        let running = match self.queue.add(task.clone(), record.clone()) {
            Ok(running) => running,
            Err(SchedulerError::AlreadyRunning { .. }) => return Ok(LaunchOutcome::NotDue),
            Err(e) => return Err(e),
        };
        // No job runs without a persisted Running record.
        if let Err(e) = self.store.save_run(&record).await {
            self.queue.remove_task(&running);
            return Err(e);
        }

        let handle = self.spawn_job(job, Arc::clone(&running));
        running.attach(handle);
        info!(task_id = %task.id, job = %task.job, run_id = %record.id, "task launched");
        Ok(LaunchOutcome::Launched)
    }

    /// Run the job on its own task. An `Err` return or a panic is recorded
    /// as a failed run straight away; a plain `Ok` is left to reconciliation.
    fn spawn_job(self: &Arc<Self>, job: Arc<dyn Job>, running: Arc<RunningTask>) -> JoinHandle<()> {
        let inner = Arc::clone(self);
        let sink = ProgressSink::new(
            Arc::clone(&running),
            Arc::clone(self) as Arc<dyn ProgressListener>,
        );
        let cancel = self.cancel.clone();
        let job_task = Arc::clone(&running);

        tokio::spawn(async move {
            // Inner task so a panic in the job surfaces as a JoinError here
            // instead of unwinding through the wrapper.
            let outcome = tokio::spawn(async move { job.invoke(job_task, sink, cancel).await }).await;
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(JobError::Cancelled)) => Some("cancelled".to_string()),
                Ok(Err(e)) => Some(e.to_string()),
                Err(e) if e.is_panic() => Some(format!("job panicked: {}", panic_message(e.into_panic()))),
                Err(e) => Some(format!("job aborted: {e}")),
            };
            if let Some(reason) = failure {
                warn!(task_id = %running.task_id(), reason = %reason, "job failed");
                inner.finalize(&running, RunStatus::Error, Some(reason)).await;
            }
        })
    }

    /// Finalise, persist, then dequeue. Returns false if the run was already
    /// finalised by another path.
    async fn finalize(
        &self,
        task: &Arc<RunningTask>,
        status: RunStatus,
        message: Option<String>,
    ) -> bool {
        let Some(record) = task.try_finalize(status, self.clock.now(), message) else {
            return false;
        };
        // Persist before dequeue: once the task leaves the queue, the next due
        // check reads the store and must see this run as finished.
        if let Err(e) = self.store.save_run(&record).await {
            // Still dequeued; the stale Running record has no next due, so the
            // task counts as due on the next tick.
            error!(task_id = %record.task_id, run_id = %record.id, error = %e, "failed to persist finished run");
        }
        self.queue.remove_task(task);
        info!(
            task_id = %record.task_id,
            status = %record.status,
            next_due = ?record.next_due,
            "run finished"
        );
        true
    }
}

#[async_trait]
impl ProgressListener for SchedulerInner {
    async fn on_progress(&self, task: &Arc<RunningTask>, progress: &TaskProgress) {
        if progress.status.is_terminal() {
            self.finalize(task, progress.status, progress.message.clone())
                .await;
        } else {
            debug!(task_id = %task.task_id(), message = ?progress.message, "progress");
        }
    }
}

#[async_trait]
impl Subscriber for Scheduler {
    async fn handle(&self, event: &EntityEvent) -> cadence_events::Result<()> {
        let task: ScheduledTask = event.decode()?;
        if !task.is_enabled() {
            debug!(task_id = %task.id, "updated task not enabled; ignoring");
            return Ok(());
        }
        match self.run_if_due(&task, true).await {
            Ok(outcome) => {
                debug!(task_id = %task.id, ?outcome, "definition update handled");
                Ok(())
            }
            Err(e) => Err(EventError::HandlerFailed(e.to_string())),
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use chrono::{Duration as ChronoDuration, TimeZone};

    struct Noop;

    #[async_trait]
    impl Job for Noop {
        async fn invoke(
            &self,
            _task: Arc<RunningTask>,
            _progress: ProgressSink,
            _cancel: CancellationToken,
        ) -> std::result::Result<(), JobError> {
            Ok(())
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn scheduler(store: Arc<MemoryStore>, clock: Arc<ManualClock>) -> Scheduler {
        let registry = Arc::new(JobRegistry::new());
        registry.register_job("noop", Arc::new(Noop));
        Scheduler::new(
            store,
            registry,
            SchedulerOptions::new(HostId::from("test")).with_clock(clock),
        )
    }

    fn finished_run(task: &ScheduledTask, start: DateTime<Utc>, next_due: DateTime<Utc>) -> RunRecord {
        RunRecord {
            finished_at: Some(start + ChronoDuration::seconds(1)),
            status: RunStatus::Succeeded,
            next_due: Some(next_due),
            ..RunRecord::start(&task.id, &HostId::from("test"), start)
        }
    }

    #[tokio::test]
    async fn due_when_no_history() {
        let task = ScheduledTask::new("a", "A", "noop", IntervalType::Minutes, 5);
        let store = Arc::new(MemoryStore::with_definitions([task.clone()]));
        let sched = scheduler(store, Arc::new(ManualClock::new(t0())));
        assert!(sched.should_run_now(&task, false).await.unwrap());
    }

    #[tokio::test]
    async fn not_due_before_next_due() {
        let task = ScheduledTask::new("a", "A", "noop", IntervalType::Minutes, 5);
        let store = Arc::new(MemoryStore::with_definitions([task.clone()]));
        store
            .save_run(&finished_run(&task, t0(), t0() + ChronoDuration::minutes(5)))
            .await
            .unwrap();
        let clock = Arc::new(ManualClock::new(t0() + ChronoDuration::minutes(2)));
        let sched = scheduler(Arc::clone(&store), Arc::clone(&clock));

        assert!(!sched.should_run_now(&task, false).await.unwrap());
        assert!(sched.should_run_now(&task, true).await.unwrap());

        clock.set(t0() + ChronoDuration::minutes(5));
        assert!(!sched.should_run_now(&task, false).await.unwrap());
        clock.advance(ChronoDuration::seconds(1));
        assert!(sched.should_run_now(&task, false).await.unwrap());
    }

    #[tokio::test]
    async fn history_on_other_host_is_ignored() {
        let task = ScheduledTask::new("a", "A", "noop", IntervalType::Days, 1);
        let store = Arc::new(MemoryStore::with_definitions([task.clone()]));
        let mut elsewhere = finished_run(&task, t0(), t0() + ChronoDuration::days(1));
        elsewhere.host = HostId::from("other");
        store.save_run(&elsewhere).await.unwrap();

        let sched = scheduler(store, Arc::new(ManualClock::new(t0())));
        assert!(sched.should_run_now(&task, false).await.unwrap());
    }

    #[tokio::test]
    async fn startup_task_runs_once_per_process() {
        let task = ScheduledTask::new("boot", "Boot", "noop", IntervalType::Startup, 1);
        let store = Arc::new(MemoryStore::with_definitions([task.clone()]));
        let before = t0() - ChronoDuration::hours(1);
        store.save_run(&finished_run(&task, before, before)).await.unwrap();

        let sched = scheduler(Arc::clone(&store), Arc::new(ManualClock::new(t0())));
        assert!(sched.should_run_now(&task, false).await.unwrap());

        let after = t0() + ChronoDuration::minutes(1);
        store.save_run(&finished_run(&task, after, after)).await.unwrap();
        assert!(!sched.should_run_now(&task, false).await.unwrap());
    }

    #[tokio::test]
    async fn disabled_is_never_due_even_when_forced() {
        let task = ScheduledTask::new("a", "A", "noop", IntervalType::Minutes, 5).disabled();
        let store = Arc::new(MemoryStore::with_definitions([task.clone()]));
        let sched = scheduler(store, Arc::new(ManualClock::new(t0())));
        assert!(!sched.should_run_now(&task, false).await.unwrap());
        assert!(!sched.should_run_now(&task, true).await.unwrap());
    }

    #[tokio::test]
    async fn zero_interval_only_runs_when_forced() {
        let task = ScheduledTask::new("a", "A", "noop", IntervalType::Minutes, 0);
        let store = Arc::new(MemoryStore::with_definitions([task.clone()]));
        let sched = scheduler(store, Arc::new(ManualClock::new(t0())));
        assert!(!sched.should_run_now(&task, false).await.unwrap());
        assert!(sched.should_run_now(&task, true).await.unwrap());
    }

    #[test]
    fn panic_payloads_are_readable() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(7_u8)), "unknown panic");
    }
}
