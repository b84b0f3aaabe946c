//! zimaport entry point.
//!
//! Wires the engine's collaborators together — store, status cache,
//! cancel registry, worker pool, control surface — and runs a single
//! migration from the command line, printing progress until the task
//! reaches a terminal state.
//!
//! ```bash
//! zimaport --host http://192.168.1.50 --username admin --password secret \
//!     --base-path /media/ZimaOS-HD /volume1/photos /volume1/music
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use zimaport_engine::{
    CancelRegistry, EngineConfig, MigrationControl, RunnerSettings, TaskRunner, WorkerPool,
    ZimaFactory,
};
use zimaport_status::StatusCache;
use zimaport_store::{MigrationOptions, NewTask, TaskStore};

#[derive(Parser)]
#[command(name = "zimaport")]
#[command(about = "Migrate local folders to a ZimaOS appliance", long_about = None)]
struct Cli {
    /// Source folders to migrate.
    #[arg(required = true)]
    sources: Vec<String>,

    /// Appliance address, e.g. http://192.168.1.50
    #[arg(long)]
    host: String,

    /// Appliance account name.
    #[arg(long)]
    username: String,

    /// Appliance account password.
    #[arg(long)]
    password: String,

    /// Destination base path on the appliance.
    #[arg(long)]
    base_path: String,

    /// Include #recycle directories.
    #[arg(long)]
    include_recycle: bool,

    /// Abort the whole task on the first per-file failure.
    #[arg(long)]
    no_skip_errors: bool,

    /// Verify uploads afterwards (size + head-bytes compare).
    #[arg(long)]
    verify: bool,

    /// Task database path (overrides DB_PATH).
    #[arg(long)]
    db: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from_env();
    let db_path = cli.db.clone().unwrap_or_else(|| config.db_path.clone());

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        db = %db_path,
        workers = config.worker_count,
        "starting zimaport"
    );

    let store = Arc::new(
        TaskStore::open(&db_path)
            .await
            .with_context(|| format!("failed to open task database at {db_path}"))?,
    );
    let status = Arc::new(StatusCache::new());
    let cancels = CancelRegistry::new();
    let factory = Arc::new(ZimaFactory::new(
        Duration::from_secs(config.appliance_timeout_secs),
        config.upload_chunk_size,
    ));
    let runner = Arc::new(TaskRunner::new(
        Arc::clone(&store),
        Arc::clone(&status),
        cancels.clone(),
        factory,
        RunnerSettings {
            max_retries: config.max_retries,
            ..RunnerSettings::default()
        },
    ));
    let pool = Arc::new(WorkerPool::start(
        runner,
        config.worker_count,
        config.queue_capacity,
    ));
    let control = MigrationControl::new(store, status, cancels, Arc::clone(&pool));

    let options = MigrationOptions {
        skip_errors: !cli.no_skip_errors,
        include_recycle: cli.include_recycle,
        enable_verification: cli.verify || config.enable_verification,
        verify_chunk_size: config.verify_chunk_size,
        ..MigrationOptions::default()
    };
    let task_id = control
        .create_task(NewTask {
            source_folders: cli.sources,
            host: cli.host,
            username: cli.username,
            password: cli.password,
            base_path: cli.base_path,
            options,
        })
        .await
        .context("failed to create migration task")?;
    control
        .submit(&task_id)
        .await
        .context("failed to enqueue migration task")?;
    println!("task {task_id} submitted");

    // Ctrl-C cancels the task instead of abandoning it mid-upload.
    let exit_status = tokio::select! {
        status = watch_until_terminal(&control, &task_id) => status?,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\ninterrupted, cancelling task {task_id}");
            control.cancel(&task_id).await.context("failed to cancel task")?;
            watch_until_terminal(&control, &task_id).await?
        }
    };

    pool.stop().await;

    match exit_status {
        TerminalStatus::Completed => {
            println!("migration completed");
            Ok(())
        }
        TerminalStatus::Cancelled => {
            println!("migration cancelled");
            Ok(())
        }
        TerminalStatus::Failed(error) => {
            anyhow::bail!("migration failed: {error}")
        }
    }
}

enum TerminalStatus {
    Completed,
    Cancelled,
    Failed(String),
}

/// Polls the control surface once a second, printing a progress line
/// per poll, until the task goes terminal.
async fn watch_until_terminal(
    control: &MigrationControl,
    task_id: &str,
) -> anyhow::Result<TerminalStatus> {
    use zimaport_store::TaskState;

    loop {
        let status = control.get_status(task_id).await?;
        match status.status {
            TaskState::Completed => return Ok(TerminalStatus::Completed),
            TaskState::Cancelled => return Ok(TerminalStatus::Cancelled),
            TaskState::Failed => {
                return Ok(TerminalStatus::Failed(
                    status.last_error.unwrap_or_else(|| "unknown error".into()),
                ))
            }
            _ => {
                println!(
                    "[{}] {:6.2}%  {}/{} files  {}  {}/s  eta {}s  {}",
                    status.status,
                    status.progress,
                    status.processed_files,
                    status.total_files,
                    human_bytes(status.transferred_bytes),
                    human_bytes(status.speed),
                    status.eta,
                    status.current_file,
                );
            }
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

fn human_bytes(n: i64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = n.max(0) as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", n.max(0), UNITS[0])
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
