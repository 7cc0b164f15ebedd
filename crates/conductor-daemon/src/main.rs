use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::info;

use conductor_agent::{AgentWorker, EntryPointRegistry, ExecutionEngine};
use conductor_core::ConductorConfig;
use conductor_packages::{FsPackageStore, NoRestorer, PackageResolver, ProcessRestorer, Restorer};
use conductor_queue::SqliteLeaseQueue;
use conductor_scheduler::SchedulerEngine;
use conductor_store::MetadataStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Role {
    /// Evaluate schedules and enqueue due work.
    Scheduler,
    /// Consume the queue and execute jobs.
    Agent,
    /// Both roles in one process.
    All,
}

/// Job scheduling and execution daemon.
#[derive(Debug, Parser)]
#[command(name = "conductor", version, about)]
struct Cli {
    /// Config file (falls back to CONDUCTOR_CONFIG, then ./conductor.toml).
    #[arg(long)]
    config: Option<String>,

    /// Which part of the pipeline this process runs.
    #[arg(long, value_enum, default_value_t = Role::All)]
    role: Role,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let config = ConductorConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        ConductorConfig::default()
    });

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    // WAL once up front; both stores create their schemas on construction.
    {
        let db = rusqlite::Connection::open(db_path)?;
        db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut tasks = Vec::new();

    if matches!(cli.role, Role::Scheduler | Role::All) {
        // Each subsystem gets its own connection for thread safety.
        let store = Arc::new(MetadataStore::new(rusqlite::Connection::open(db_path)?)?);
        let queue = Arc::new(SqliteLeaseQueue::new(rusqlite::Connection::open(db_path)?)?);
        let engine = SchedulerEngine::new(store, queue, config.scheduler.clone());
        tasks.push(tokio::spawn(engine.run(shutdown_rx.clone())));
        info!("scheduler role started");
    }

    if matches!(cli.role, Role::Agent | Role::All) {
        let store = Arc::new(MetadataStore::new(rusqlite::Connection::open(db_path)?)?);
        let queue = Arc::new(SqliteLeaseQueue::new(rusqlite::Connection::open(db_path)?)?);

        let packages = Arc::new(FsPackageStore::new(config.packages.root.clone()));
        let restorer: Arc<dyn Restorer> = match &config.packages.restore_command {
            Some(command) => Arc::new(ProcessRestorer::new(command.clone())),
            None => Arc::new(NoRestorer),
        };
        let resolver =
            PackageResolver::new(packages, restorer, config.packages.target_platform.clone());

        let engine = ExecutionEngine::new(
            store,
            resolver,
            EntryPointRegistry::with_defaults(),
            config.agent.clone(),
        );
        let worker = AgentWorker::new(queue, engine, config.agent.clone());
        tasks.push(tokio::spawn(worker.run(shutdown_rx.clone())));
        info!(agent_id = config.agent.id, "agent role started");
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }
}
