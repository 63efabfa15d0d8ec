//! Jobs shipped with the daemon.

mod heartbeat;
mod prune;

use std::sync::Arc;

use cadence_core::HostId;
use cadence_scheduler::{Job, JobRegistry, SqliteStore};

pub use heartbeat::HeartbeatJob;
pub use prune::HistoryPruneJob;

pub const HEARTBEAT: &str = "heartbeat";
pub const HISTORY_PRUNE: &str = "history-prune";

/// Register every built-in job on `registry`.
pub fn register_builtin(
    registry: &JobRegistry,
    host: HostId,
    store: Arc<SqliteStore>,
    retention_days: u32,
) {
    registry.register_job(HEARTBEAT, Arc::new(HeartbeatJob::new(host)));
    registry.register(HISTORY_PRUNE, move || {
        if retention_days == 0 {
            return Err("retention.history_days must be at least 1".to_string());
        }
        let job: Arc<dyn Job> = Arc::new(HistoryPruneJob::new(Arc::clone(&store), retention_days));
        Ok(job)
    });
}
