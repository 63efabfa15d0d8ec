use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{JobError, Result, SchedulerError};
use crate::progress::ProgressSink;
use crate::running::RunningTask;

/// A pluggable unit of background work.
///
/// Implementations should check `cancel` periodically and stop promptly once
/// it fires. Reporting a terminal status through `progress` is encouraged but
/// optional: a job that simply returns `Ok` is marked succeeded on the next
/// scheduler tick, and one that returns `Err` is recorded as failed.
#[async_trait]
pub trait Job: Send + Sync {
    async fn invoke(
        &self,
        task: Arc<RunningTask>,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> std::result::Result<(), JobError>;
}

/// Builds a job instance on demand. May fail, e.g. when a dependency the job
/// needs is unavailable.
pub type JobFactory = Arc<dyn Fn() -> std::result::Result<Arc<dyn Job>, String> + Send + Sync>;

/// Maps job implementation identifiers to factories.
pub struct JobRegistry {
    factories: RwLock<HashMap<String, JobFactory>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Register a factory. An existing entry with the same name is replaced.
    pub fn register<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> std::result::Result<Arc<dyn Job>, String> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(job = %name, "job registered");
        self.factories
            .write()
            .expect("job registry poisoned")
            .insert(name, Arc::new(factory));
    }

    /// Register a ready-made instance shared by every run.
    pub fn register_job(&self, name: impl Into<String>, job: Arc<dyn Job>) {
        self.register(name, move || Ok(Arc::clone(&job)));
    }

    /// Resolve `name` to a live job instance.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Job>> {
        let factory = self
            .factories
            .read()
            .expect("job registry poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownJob {
                job: name.to_string(),
            })?;

        factory().map_err(|reason| SchedulerError::JobConstruction {
            job: name.to_string(),
            reason,
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories
            .read()
            .expect("job registry poisoned")
            .contains_key(name)
    }

    /// Registered identifiers, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .factories
            .read()
            .expect("job registry poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn resolves_registered_job() {
        let registry = JobRegistry::new();
        registry.register_job("noop", Arc::new(Noop));
        assert!(registry.resolve("noop").is_ok());
        assert!(registry.contains("noop"));
    }

    #[test]
    fn unknown_job_is_definition_error() {
        let registry = JobRegistry::new();
        let err = registry.resolve("crawler").err().unwrap();
        assert!(matches!(err, SchedulerError::UnknownJob { ref job } if job == "crawler"));
        assert!(err.is_definition_error());
    }

    #[test]
    fn failing_factory_is_definition_error() {
        let registry = JobRegistry::new();
        registry.register("broken", || Err("missing credentials".to_string()));
        let err = registry.resolve("broken").err().unwrap();
        assert!(matches!(err, SchedulerError::JobConstruction { .. }));
        assert!(err.is_definition_error());
    }

    #[test]
    fn names_are_sorted() {
        let registry = JobRegistry::new();
        registry.register_job("zeta", Arc::new(Noop));
        registry.register_job("alpha", Arc::new(Noop));
        assert_eq!(registry.names(), vec!["alpha".to_string(), "zeta".to_string()]);
    }
}
