use std::sync::Arc;

use anyhow::Context;
use cadence_core::config::{CadenceConfig, TaskSeed};
use cadence_core::{HostId, TaskId};
use cadence_events::{EntityEvent, EntityKind, EventBus};
use cadence_scheduler::{
    IntervalType, JobRegistry, RunRecord, ScheduledTask, Scheduler, SchedulerOptions, SqliteStore,
    TaskStore,
};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

mod jobs;

#[derive(Debug, Parser)]
#[command(name = "cadence", version, about = "Interval-based background task scheduler")]
struct Cli {
    /// Config file; falls back to ~/.cadence/cadence.toml.
    #[arg(long, global = true, env = "CADENCE_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the scheduler until Ctrl-C.
    Run,
    /// List task definitions with their latest run on this host.
    Tasks,
    /// Show recent runs of one task.
    History {
        task_id: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // config first so its log filter applies; the warning is emitted once logging is up
    let (config, config_err) = match CadenceConfig::load(cli.config.as_deref()) {
        Ok(config) => (config, None),
        Err(e) => (CadenceConfig::default(), Some(e)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.filter.as_str().into()),
        )
        .init();

    if let Some(e) = config_err {
        warn!("Config load failed ({}), using defaults", e);
    }

    let store = Arc::new(open_store(&config.database.path)?);
    let host = config.scheduler.host();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config, store, host).await,
        Command::Tasks => list_tasks(&store, &host).await,
        Command::History { task_id, limit } => show_history(&store, &TaskId::from(task_id), limit),
    }
}

async fn run(
    config: CadenceConfig,
    store: Arc<SqliteStore>,
    host: HostId,
) -> anyhow::Result<()> {
    let registry = Arc::new(JobRegistry::new());
    jobs::register_builtin(
        &registry,
        host.clone(),
        Arc::clone(&store),
        config.retention.history_days,
    );

    let scheduler = Scheduler::new(
        store.clone(),
        registry,
        SchedulerOptions::new(host.clone()).with_tick(config.scheduler.tick_period()),
    );
    let bus = EventBus::new();
    scheduler.subscribe(&bus);

    seed_tasks(&store, &bus, &config.tasks).await?;

    scheduler.start();
    info!(host = %host, "cadence running; press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutdown requested");
    scheduler.stop().await;
    Ok(())
}

fn open_store(db_path: &str) -> anyhow::Result<SqliteStore> {
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");
    let conn = rusqlite::Connection::open(db_path)
        .with_context(|| format!("cannot open database at {db_path}"))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(SqliteStore::new(conn)?)
}

/// Upsert config-declared definitions. A definition whose stored form changed
/// is announced on the bus so the scheduler evaluates it right away.
async fn seed_tasks(store: &SqliteStore, bus: &EventBus, seeds: &[TaskSeed]) -> anyhow::Result<()> {
    for seed in seeds {
        let task = match to_definition(seed) {
            Ok(task) => task,
            Err(e) => {
                warn!(task_id = %seed.id, error = %e, "skipping invalid task seed");
                continue;
            }
        };

        let previous = store.get_definition(&task.id)?;
        if previous.as_ref() == Some(&task) {
            continue;
        }
        store.upsert_definition(&task)?;

        if previous.is_some() {
            info!(task_id = %task.id, "task definition updated from config");
            let event = EntityEvent::updated(EntityKind::TaskDefinition, task.id.as_str(), &task)?;
            bus.dispatch(&event).await;
        } else {
            info!(task_id = %task.id, job = %task.job, "task definition added from config");
        }
    }
    Ok(())
}

fn to_definition(seed: &TaskSeed) -> Result<ScheduledTask, String> {
    let interval_type: IntervalType = seed.interval_type.parse()?;
    let mut task = ScheduledTask::new(
        seed.id.as_str(),
        seed.name.clone(),
        seed.job.clone(),
        interval_type,
        seed.interval,
    );
    task.enabled = seed.enabled;
    Ok(task)
}

async fn list_tasks(store: &SqliteStore, host: &HostId) -> anyhow::Result<()> {
    let tasks = store.list_definitions().await?;
    if tasks.is_empty() {
        println!("no task definitions");
        return Ok(());
    }

    println!(
        "{:<20} {:<16} {:<8} {:<12} {:<10} {}",
        "ID", "JOB", "ENABLED", "EVERY", "LAST", "NEXT DUE"
    );
    for task in tasks {
        let latest = store.latest_run(&task.id, host).await?;
        println!(
            "{:<20} {:<16} {:<8} {:<12} {:<10} {}",
            task.id.as_str(),
            task.job,
            task.enabled,
            format!("{} {}", task.interval, task.interval_type),
            latest
                .as_ref()
                .map(|r| r.status.to_string())
                .unwrap_or_else(|| "-".to_string()),
            latest
                .as_ref()
                .and_then(|r| r.next_due)
                .map(|d| d.to_rfc3339())
                .unwrap_or_else(|| "-".to_string()),
        );
    }
    Ok(())
}

fn show_history(store: &SqliteStore, task_id: &TaskId, limit: usize) -> anyhow::Result<()> {
    let runs = store.history(task_id, limit)?;
    if runs.is_empty() {
        println!("no runs recorded for {task_id}");
        return Ok(());
    }
    for run in runs {
        println!("{}", format_run(&run));
    }
    Ok(())
}

fn format_run(run: &RunRecord) -> String {
    let finished = run
        .finished_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "-".to_string());
    let mut line = format!(
        "{}  {:<10} host={} finished={}",
        run.started_at.to_rfc3339(),
        run.status.to_string(),
        run.host,
        finished
    );
    if let Some(ref message) = run.message {
        line.push_str(&format!("  {message}"));
    }
    line
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_scheduler::RunStatus;
    use chrono::{TimeZone, Utc};

    fn seed(interval_type: &str) -> TaskSeed {
        TaskSeed {
            id: "hb".into(),
            name: "Heartbeat".into(),
            job: "heartbeat".into(),
            enabled: true,
            interval_type: interval_type.into(),
            interval: 5,
        }
    }

    #[test]
    fn seed_converts_to_definition() {
        let task = to_definition(&seed("Minutes")).unwrap();
        assert_eq!(task.interval_type, IntervalType::Minutes);
        assert_eq!(task.interval, 5);
        assert!(task.is_enabled());
        assert!(to_definition(&seed("fortnights")).is_err());
    }

    #[tokio::test]
    async fn reseeding_unchanged_config_is_silent() {
        let store = SqliteStore::open_in_memory().unwrap();
        let bus = EventBus::new();
        let seeds = vec![seed("minutes")];

        seed_tasks(&store, &bus, &seeds).await.unwrap();
        seed_tasks(&store, &bus, &seeds).await.unwrap();
        let all = store.list_definitions().await.unwrap();
        assert_eq!(all.len(), 1);

        let mut changed = seeds[0].clone();
        changed.interval = 10;
        seed_tasks(&store, &bus, &[changed]).await.unwrap();
        let stored = store.get_definition(&TaskId::from("hb")).unwrap().unwrap();
        assert_eq!(stored.interval, 10);
    }

    #[test]
    fn run_line_includes_message() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut run = RunRecord::start(&TaskId::from("hb"), &"node-a".into(), start);
        run.status = RunStatus::Error;
        run.message = Some("boom".into());
        let line = format_run(&run);
        assert!(line.contains("error"));
        assert!(line.contains("host=node-a"));
        assert!(line.ends_with("boom"));
    }
}
