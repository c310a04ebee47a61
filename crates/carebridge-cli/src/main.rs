//! Carebridge CLI - Operator interface for the appointment sync queue
//!
//! Books appointments against the local store, runs the background sync
//! worker, and exposes the statistics/administrative-retry surface.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use carebridge_core::downstream::PmsClient;
use carebridge_core::{QueueStats, RetryPolicy, SyncService, SyncTask, SyncWorker, SyncWorkerConfig};
use clap::{Parser, Subcommand};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "carebridge")]
#[command(about = "Write-behind appointment sync for practice-management systems")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Optional path to local database file
    #[arg(long, value_name = "PATH")]
    db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Book an appointment and queue it for downstream sync
    Book {
        /// Client display name
        #[arg(long)]
        client: String,
        /// Appointment start time (RFC 3339, e.g. 2026-09-01T09:30:00Z)
        #[arg(long)]
        at: String,
    },
    /// Run the background sync worker until interrupted
    Run {
        /// Seconds between sync cycles
        #[arg(long, default_value = "30")]
        interval_secs: u64,
        /// Maximum tasks processed per cycle
        #[arg(long, default_value = "10")]
        batch_size: usize,
        /// Failed attempts before a task is parked as failed
        #[arg(long, default_value = "5")]
        max_attempts: u32,
        /// Base delay in seconds for exponential backoff (0 retries every cycle)
        #[arg(long, default_value = "30")]
        backoff_base_secs: u64,
    },
    /// Show queue counts by state
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Re-admit all failed tasks to the pending queue
    RetryFailed,
    /// List failed tasks awaiting an administrative retry
    Failed {
        /// Number of tasks to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] carebridge_core::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid start time {0:?}: expected RFC 3339, e.g. 2026-09-01T09:30:00Z")]
    InvalidStartTime(String),
    #[error("Downstream client error: {0}")]
    Downstream(String),
    #[error(
        "Practice-management sync is not configured. Set CAREBRIDGE_PMS_URL and \
         CAREBRIDGE_PMS_API_KEY to enable `carebridge run`."
    )]
    PmsNotConfigured,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("carebridge=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);

    match cli.command {
        Commands::Book { client, at } => run_book(&client, &at, &db_path).await?,
        Commands::Run {
            interval_secs,
            batch_size,
            max_attempts,
            backoff_base_secs,
        } => {
            run_worker(
                interval_secs,
                batch_size,
                max_attempts,
                backoff_base_secs,
                &db_path,
            )
            .await?;
        }
        Commands::Stats { json } => run_stats(json, &db_path).await?,
        Commands::RetryFailed => run_retry_failed(&db_path).await?,
        Commands::Failed { limit } => run_failed(limit, &db_path).await?,
    }

    Ok(())
}

fn resolve_db_path(flag: Option<PathBuf>) -> PathBuf {
    if let Some(path) = flag {
        return path;
    }
    if let Ok(path) = env::var("CAREBRIDGE_DB_PATH") {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("carebridge")
        .join("carebridge.db")
}

fn parse_starts_at(raw: &str) -> Result<i64, CliError> {
    chrono::DateTime::parse_from_rfc3339(raw.trim())
        .map(|at| at.timestamp_millis())
        .map_err(|_| CliError::InvalidStartTime(raw.to_string()))
}

async fn run_book(client: &str, at: &str, db_path: &Path) -> Result<(), CliError> {
    let starts_at = parse_starts_at(at)?;
    let service = SyncService::open_path(db_path).await?;

    let (appointment, task_id) = service.book_appointment(client, starts_at).await?;
    println!("Booked appointment {} (sync task {task_id})", appointment.id);
    Ok(())
}

async fn run_worker(
    interval_secs: u64,
    batch_size: usize,
    max_attempts: u32,
    backoff_base_secs: u64,
    db_path: &Path,
) -> Result<(), CliError> {
    let base_url = require_env("CAREBRIDGE_PMS_URL")?;
    let api_key = require_env("CAREBRIDGE_PMS_API_KEY")?;
    let client =
        PmsClient::new(base_url, api_key).map_err(|error| CliError::Downstream(error.to_string()))?;

    let service = SyncService::open_path(db_path).await?;
    let config = SyncWorkerConfig::default()
        .with_sync_interval(Duration::from_secs(interval_secs))
        .with_batch_size(batch_size)
        .with_retry(
            RetryPolicy::new(max_attempts)
                .with_backoff_base(Duration::from_secs(backoff_base_secs)),
        );
    let worker = SyncWorker::new(service, client, config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received; stopping after the current cycle");
            shutdown_tx.send(true).ok();
        }
    });

    worker.run(shutdown_rx).await;
    Ok(())
}

async fn run_stats(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let service = SyncService::open_path(db_path).await?;
    let stats = service.stats().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        for line in format_stats_lines(&stats) {
            println!("{line}");
        }
    }
    Ok(())
}

async fn run_retry_failed(db_path: &Path) -> Result<(), CliError> {
    let service = SyncService::open_path(db_path).await?;
    let reset = service.retry_failed().await?;
    println!("Re-admitted {reset} failed tasks to pending");
    Ok(())
}

#[derive(Debug, Serialize)]
struct FailedTaskItem {
    id: i64,
    appointment_id: String,
    attempt_count: u32,
    last_error: Option<String>,
    created_at: i64,
}

async fn run_failed(limit: usize, db_path: &Path) -> Result<(), CliError> {
    let service = SyncService::open_path(db_path).await?;
    let tasks = service.list_failed(limit).await?;

    if tasks.is_empty() {
        println!("No failed tasks");
        return Ok(());
    }

    for line in format_failed_lines(&tasks) {
        println!("{line}");
    }
    Ok(())
}

fn format_stats_lines(stats: &QueueStats) -> Vec<String> {
    vec![
        format!("pending  {}", stats.pending),
        format!("synced   {}", stats.synced),
        format!("failed   {}", stats.failed),
        format!("total    {}", stats.total),
    ]
}

fn format_failed_lines(tasks: &[SyncTask]) -> Vec<String> {
    tasks
        .iter()
        .map(|task| {
            format!(
                "{}  appointment={}  attempts={}  error={}",
                task.id,
                task.appointment_id,
                task.attempt_count,
                task.last_error.as_deref().unwrap_or("-")
            )
        })
        .collect()
}

fn require_env(name: &'static str) -> Result<String, CliError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(CliError::PmsNotConfigured),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carebridge_core::TaskState;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn parse_starts_at_accepts_rfc3339() {
        let ms = parse_starts_at("2026-09-01T09:30:00Z").unwrap();
        assert_eq!(ms, 1_788_255_000_000);
    }

    #[test]
    fn parse_starts_at_rejects_garbage() {
        assert!(parse_starts_at("tomorrow at nine").is_err());
        assert!(parse_starts_at("").is_err());
    }

    #[test]
    fn format_stats_lines_lists_all_states() {
        let stats = QueueStats {
            pending: 3,
            synced: 10,
            failed: 1,
            total: 14,
        };
        let lines = format_stats_lines(&stats);
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "pending  3");
        assert_eq!(lines[3], "total    14");
    }

    #[test]
    fn format_failed_lines_includes_last_error() {
        let task = SyncTask {
            id: 7.into(),
            appointment_id: "appt-1".to_string(),
            payload: Vec::new(),
            state: TaskState::Failed,
            attempt_count: 5,
            next_eligible_at: 0,
            last_attempt_at: Some(1),
            last_error: Some("rate limited (429)".to_string()),
            created_at: 0,
            synced_at: None,
        };
        let lines = format_failed_lines(&[task]);
        assert_eq!(
            lines[0],
            "7  appointment=appt-1  attempts=5  error=rate limited (429)"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn book_then_stats_shows_one_pending_task() {
        let tmp = tempdir().unwrap();
        let db_path = tmp.path().join("carebridge.db");

        let starts_at = parse_starts_at("2026-09-01T09:30:00Z").unwrap();
        let service = SyncService::open_path(&db_path).await.unwrap();
        service.book_appointment("Dana Reyes", starts_at).await.unwrap();
        drop(service);

        let service = SyncService::open_path(&db_path).await.unwrap();
        let stats = service.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.total, 1);
    }
}
