//! `taskdeck`: offline-first task list on the command line.
//!
//! Every invocation loads the local task file, reconciles it with the
//! server when one is reachable, runs one command, and writes the file
//! back. Changes made while offline are kept and pushed by `taskdeck sync`.
//! Configuration via CLI flags, environment variables, or config file
//! (`~/.config/taskdeck/config.toml`).
//!
//! ```bash
//! # Against a server
//! taskdeck --base-url https://tasks.example.com/api --token secret add "buy milk"
//!
//! # Local only, with an in-process server seeded from the task file
//! taskdeck --offline-demo list
//!
//! # Push pending changes
//! TASKDECK_BASE_URL=http://127.0.0.1:8080 taskdeck sync
//! ```

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::Parser;
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;

use taskdeck::config::{CliArgs, ClientConfig, Command};
use taskdeck::remote::{HttpTaskService, InMemoryTaskService, RemoteError, RemoteTaskService};
use taskdeck::store::{FileBackend, Persistence, StoreError};
use taskdeck::sync::{SyncEngine, SyncError, SyncEvent, SyncOutcome, SyncState};
use taskdeck_proto::task::{Category, Importance, TaskId, TaskRecord};

/// Errors that end the process with a non-zero status.
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    Usage(String),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::from(2);
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!(store = %config.store_path.display(), "taskdeck starting");

    let command = cli.command.unwrap_or(Command::List);
    let result = match config.base_url.clone() {
        Some(base_url) if !config.offline_demo => {
            match HttpTaskService::new(
                base_url,
                config.token.clone(),
                config.device_id.clone(),
                config.request_timeout,
            ) {
                Ok(remote) => run(remote, &config, command).await,
                Err(e) => Err(CliError::Usage(e.to_string())),
            }
        }
        _ => {
            if !config.offline_demo {
                eprintln!("No server configured; running against a local in-process server.");
            }
            match demo_service(&config.backend()).await {
                Ok(remote) => run(remote, &config, command).await,
                Err(e) => Err(e),
            }
        }
    };

    match result {
        Ok(()) => {
            tracing::info!("taskdeck exiting");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging.
///
/// Logs go to a file so they never mix with command output.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("taskdeck.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// In-process server holding whatever the task file holds.
async fn demo_service(backend: &FileBackend) -> Result<Arc<InMemoryTaskService>, CliError> {
    let service = InMemoryTaskService::new();
    service.seed(backend.load().await?);
    Ok(Arc::new(service))
}

/// Runs one command against `remote` and saves local state afterwards.
async fn run<R: RemoteTaskService>(
    remote: R,
    config: &ClientConfig,
    command: Command,
) -> Result<(), CliError> {
    let (engine, mut events) = SyncEngine::new(remote, config.backend(), config.engine_options());
    let state_path = config.sync_state_path();
    engine.restore(read_sync_state(&state_path).await);

    if let Err(e) = engine.load().await {
        eprintln!("Warning: could not reach the server ({e}); showing local tasks.");
    }

    let result = execute(&engine, command).await;

    drain_events(&mut events);
    if let Err(e) = engine.persist().await {
        eprintln!("Warning: failed to save tasks: {e}");
    }
    if let Err(e) = write_sync_state(&state_path, &engine.snapshot()).await {
        tracing::warn!(error = %e, path = %state_path.display(), "failed to save sync state");
    }
    if engine.is_dirty() {
        println!("(pending changes; run `taskdeck sync` when online)");
    }
    result
}

async fn execute<R: RemoteTaskService, P: Persistence>(
    engine: &SyncEngine<R, P>,
    command: Command,
) -> Result<(), CliError> {
    match command {
        Command::List => {
            let items = engine.items();
            if items.is_empty() {
                println!("No tasks.");
            }
            for record in &items {
                println!("{}", render(record));
            }
        }
        Command::Add {
            text,
            importance,
            deadline,
            color,
            category,
        } => {
            let mut record = TaskRecord::new(text);
            if let Some(name) = importance {
                let importance = Importance::from_name(&name)
                    .ok_or_else(|| CliError::Usage(format!("unknown importance {name:?}")))?;
                record = record.with_importance(importance);
            }
            if let Some(raw) = deadline {
                record = record.with_deadline(parse_deadline(&raw)?);
            }
            if let Some(color) = color {
                record = record.with_color(color);
            }
            if let Some(name) = category {
                let category = Category::from_name(&name)
                    .ok_or_else(|| CliError::Usage(format!("unknown category {name:?}")))?;
                record = record.with_category(category);
            }
            let id = record.id.clone();
            let shown = tolerate_offline(engine.add(record).await, || engine.get(&id))?;
            if let Some(record) = shown {
                println!("Added {}", render(&record));
            }
        }
        Command::Done { id } => set_done(engine, &id, true).await?,
        Command::Undo { id } => set_done(engine, &id, false).await?,
        Command::Edit { id, text } => {
            let id = TaskId::from(id);
            let mut record = engine
                .get(&id)
                .ok_or_else(|| SyncError::NotFound(id.clone()))?;
            record.text = text;
            let shown = tolerate_offline(engine.update(record).await, || engine.get(&id))?;
            if let Some(record) = shown {
                println!("Updated {}", render(&record));
            }
        }
        Command::Remove { id } => {
            let id = TaskId::from(id);
            match engine.delete(&id).await {
                Ok(record) => println!("Removed {}", render(&record)),
                Err(SyncError::Remote(e)) => report_offline(&e),
                Err(e) => return Err(e.into()),
            }
        }
        Command::Sync => match engine.synchronize().await? {
            SyncOutcome::UpToDate => println!("Already up to date."),
            SyncOutcome::Synchronized(report) => println!(
                "Synchronized: {} inserted, {} updated, {} removed, {} kept.",
                report.inserted, report.updated, report.removed, report.kept
            ),
        },
        Command::Status => {
            println!("tasks:    {}", engine.items().len());
            println!("revision: {}", engine.revision());
            println!("dirty:    {}", engine.is_dirty());
            if let Some(error) = engine.last_error() {
                println!("last error: {error}");
            }
        }
    }
    Ok(())
}

async fn set_done<R: RemoteTaskService, P: Persistence>(
    engine: &SyncEngine<R, P>,
    id: &str,
    done: bool,
) -> Result<(), CliError> {
    let id = TaskId::from(id);
    let shown = tolerate_offline(engine.set_done(&id, done).await, || engine.get(&id))?;
    if let Some(record) = shown {
        println!("{}", render(&record));
    }
    Ok(())
}

/// A remote failure after a local change is not fatal: the change is kept
/// and shown as it stands locally.
fn tolerate_offline(
    result: Result<TaskRecord, SyncError>,
    local: impl FnOnce() -> Option<TaskRecord>,
) -> Result<Option<TaskRecord>, CliError> {
    match result {
        Ok(record) => Ok(Some(record)),
        Err(SyncError::Remote(e)) => {
            report_offline(&e);
            Ok(local())
        }
        Err(e) => Err(e.into()),
    }
}

fn report_offline(error: &RemoteError) {
    eprintln!("Warning: server did not accept the change ({error}); kept locally.");
}

fn parse_deadline(raw: &str) -> Result<DateTime<Utc>, CliError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CliError::Usage(format!("invalid deadline {raw:?}: {e}")))
}

fn render(record: &TaskRecord) -> String {
    let mut line = format!(
        "[{}] {}  {}",
        if record.is_done { "x" } else { " " },
        record.id,
        record.text
    );
    if record.importance != Importance::Normal {
        line.push_str(&format!("  !{}", record.importance.as_str()));
    }
    if let Some(deadline) = record.deadline {
        line.push_str(&format!("  due {}", deadline.format("%Y-%m-%d %H:%M")));
    }
    if let Some(category) = record.category {
        line.push_str(&format!("  #{}", category.as_str()));
    }
    line
}

/// Logs queued engine events and echoes failures.
fn drain_events(events: &mut mpsc::Receiver<SyncEvent>) {
    while let Ok(event) = events.try_recv() {
        match &event {
            SyncEvent::PersistFailed { reason } => {
                eprintln!("Warning: failed to save tasks: {reason}");
            }
            SyncEvent::LocalLoadFailed { reason } => {
                eprintln!("Warning: could not read the task file: {reason}");
            }
            _ => tracing::debug!(?event, "sync event"),
        }
    }
}

async fn read_sync_state(path: &Path) -> SyncState {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            tracing::warn!(error = %e, path = %path.display(), "ignoring unreadable sync state");
            SyncState::default()
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => SyncState::default(),
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "failed to read sync state");
            SyncState::default()
        }
    }
}

async fn write_sync_state(path: &Path, state: &SyncState) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(state)
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await?;
    Ok(())
}
