use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::types::HostId;

pub const DEFAULT_TICK_SECS: u64 = 60;
pub const DEFAULT_HISTORY_RETENTION_DAYS: u32 = 30;
pub const DEFAULT_LOG_FILTER: &str = "cadence=info,cadence_scheduler=info";

/// Top-level config (cadence.toml + CADENCE_* env overrides).
///
/// Nested keys are separated by a double underscore in the environment,
/// e.g. `CADENCE_SCHEDULER__TICK_SECS=30`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CadenceConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    /// Task definitions upserted into the store on startup.
    #[serde(default)]
    pub tasks: Vec<TaskSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Driver tick period in seconds.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Overrides the OS hostname as the run-history scope.
    pub host_id: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: DEFAULT_TICK_SECS,
            host_id: None,
        }
    }
}

impl SchedulerConfig {
    pub fn host(&self) -> HostId {
        HostId::resolve(self.host_id.as_deref())
    }

    /// Tick period, never shorter than one second.
    pub fn tick_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.tick_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing-subscriber` EnvFilter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

/// How long finished run history is kept by the `history-prune` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_retention_days")]
    pub history_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            history_days: DEFAULT_HISTORY_RETENTION_DAYS,
        }
    }
}

/// A task definition declared in the config file.
///
/// `interval_type` is kept as a string here and parsed by the scheduler crate,
/// which owns the interval vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSeed {
    pub id: String,
    pub name: String,
    /// Job implementation identifier, resolved through the job registry.
    pub job: String,
    #[serde(default = "bool_true")]
    pub enabled: bool,
    pub interval_type: String,
    #[serde(default)]
    pub interval: u32,
}

fn bool_true() -> bool {
    true
}
fn default_tick_secs() -> u64 {
    DEFAULT_TICK_SECS
}
fn default_retention_days() -> u32 {
    DEFAULT_HISTORY_RETENTION_DAYS
}
fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.db", home)
}

impl CadenceConfig {
    /// Load config from a TOML file with CADENCE_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.cadence/cadence.toml
    ///
    /// A missing file is not an error; every section has defaults.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: CadenceConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CADENCE_").split("__"))
            .extract()
            .map_err(|e| crate::error::CadenceError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("cadence-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn defaults_when_file_missing() {
        let config = CadenceConfig::load(Some("/nonexistent/cadence.toml")).unwrap();
        assert_eq!(config.scheduler.tick_secs, DEFAULT_TICK_SECS);
        assert!(config.scheduler.host_id.is_none());
        assert!(config.tasks.is_empty());
        assert_eq!(config.retention.history_days, DEFAULT_HISTORY_RETENTION_DAYS);
    }

    #[test]
    fn parses_scheduler_and_tasks() {
        let path = write_temp(
            "cadence.toml",
            r#"
            [scheduler]
            tick_secs = 15
            host_id = "node-a"

            [[tasks]]
            id = "heartbeat"
            name = "Heartbeat"
            job = "heartbeat"
            interval_type = "minutes"
            interval = 5
            "#,
        );
        let config = CadenceConfig::load(path.to_str()).unwrap();
        assert_eq!(config.scheduler.tick_secs, 15);
        assert_eq!(config.scheduler.host().as_str(), "node-a");
        assert_eq!(config.tasks.len(), 1);
        let seed = &config.tasks[0];
        assert_eq!(seed.job, "heartbeat");
        assert!(seed.enabled);
        assert_eq!(seed.interval, 5);
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn tick_period_has_floor() {
        let cfg = SchedulerConfig {
            tick_secs: 0,
            host_id: None,
        };
        assert_eq!(cfg.tick_period(), std::time::Duration::from_secs(1));
    }

    #[test]
    fn malformed_file_is_config_error() {
        let path = write_temp("bad.toml", "[scheduler]\ntick_secs = \"soon\"\n");
        let err = CadenceConfig::load(path.to_str()).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }
}
