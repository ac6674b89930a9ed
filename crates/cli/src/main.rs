//! `flowrunner` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`    — start the HTTP trigger/status API.
//! - `worker`   — start a queue worker that processes node steps.
//! - `migrate`  — run pending database migrations.
//! - `validate` — lint a workflow definition JSON file.
//! - `run`      — execute a workflow file end-to-end in memory.
//!
//! Settings are read from flags, the environment or a `.env` file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use db::pool::PoolConfig;
use engine::{
    BroadcastEventBus, ExecutionStatus, InMemoryStore, PgStore, WorkflowDefinition, WorkflowEvent,
    WorkflowRunner, Worker, WorkerConfig,
};
use nodes::{ExecutorRegistry, Payload};
use queue::{InMemoryJobQueue, PgJobQueue, QueueConfig};

#[derive(Parser)]
#[command(
    name = "flowrunner",
    about = "Queue-driven workflow execution engine",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct DatabaseArgs {
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,
    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 10)]
    max_connections: u32,
}

#[derive(Args)]
struct QueueArgs {
    /// Deliveries of a step before it is dead-lettered.
    #[arg(long, env = "QUEUE_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,
    /// Seconds a claimed step may stay unacknowledged before redelivery.
    #[arg(long, env = "QUEUE_VISIBILITY_TIMEOUT_SECS", default_value_t = 300)]
    visibility_timeout_secs: u64,
}

#[derive(Args)]
struct WorkerArgs {
    #[arg(long, env = "WORKER_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,
    #[arg(long, env = "WORKER_POLL_INTERVAL_MS", default_value_t = 500)]
    poll_interval_ms: u64,
}

#[derive(Subcommand)]
enum Command {
    /// Start the REST API server.
    Serve {
        #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
        bind: String,
        #[command(flatten)]
        database: DatabaseArgs,
        #[command(flatten)]
        queue: QueueArgs,
    },
    /// Start a background worker that processes queued node steps.
    Worker {
        #[command(flatten)]
        database: DatabaseArgs,
        #[command(flatten)]
        queue: QueueArgs,
        #[command(flatten)]
        worker: WorkerArgs,
    },
    /// Run pending database migrations.
    Migrate {
        #[command(flatten)]
        database: DatabaseArgs,
    },
    /// Lint a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Run a workflow file to completion using in-memory stores.
    Run {
        /// Path to the workflow JSON file.
        path: PathBuf,
        /// Initial payload, as a JSON object.
        #[arg(long, default_value = "{}")]
        payload: String,
        #[arg(long)]
        triggered_by: Option<String>,
        /// Stop after this many steps; guards against looping graphs.
        #[arg(long, default_value_t = 10_000)]
        max_steps: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { bind, database, queue } => {
            let runner = postgres_runner(&database, &queue).await?;
            info!("Starting API server on {bind}");
            api::serve(&bind, api::AppState::new(runner)).await?;
        }
        Command::Worker { database, queue, worker } => {
            let runner = postgres_runner(&database, &queue).await?;
            let config = WorkerConfig::default()
                .with_concurrency(worker.concurrency)
                .with_poll_interval(Duration::from_millis(worker.poll_interval_ms));

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("shutdown requested");
                    let _ = shutdown_tx.send(true);
                }
            });

            Worker::new(runner, config).run(shutdown_rx).await;
        }
        Command::Migrate { database } => {
            let pool = db::pool::create_pool(&PoolConfig::new(database.database_url).with_max_connections(2))
                .await
                .context("failed to connect to database")?;
            db::pool::run_migrations(&pool).await.context("migration failed")?;
            info!("Migrations applied successfully");
        }
        Command::Validate { path } => {
            let definition = read_definition(&path)?;
            let reachable = engine::validate_definition(&definition)
                .with_context(|| format!("{} is not a valid workflow", path.display()))?;

            println!("Workflow '{}' is valid. Reachable from start: {reachable:?}", definition.name);

            let unreachable: Vec<&str> = definition
                .nodes
                .iter()
                .map(|n| n.id.as_str())
                .filter(|id| !reachable.iter().any(|r| r == id))
                .collect();
            if !unreachable.is_empty() {
                println!("Unreachable by static routing: {unreachable:?}");
            }

            let registry = ExecutorRegistry::builder().with_builtins().build();
            for (node_id, node_type) in engine::unknown_node_types(&definition, &registry) {
                println!("Node '{node_id}' uses type '{node_type}', which is not built in");
            }
        }
        Command::Run { path, payload, triggered_by, max_steps } => {
            run_in_memory(&path, &payload, triggered_by, max_steps).await?;
        }
    }

    Ok(())
}

fn read_definition(path: &Path) -> Result<WorkflowDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid workflow JSON in {}", path.display()))
}

/// Runner backed by Postgres for the store and the queue.
async fn postgres_runner(database: &DatabaseArgs, queue: &QueueArgs) -> Result<Arc<WorkflowRunner>> {
    let pool_config =
        PoolConfig::new(database.database_url.clone()).with_max_connections(database.max_connections);
    let pool = db::pool::create_pool(&pool_config)
        .await
        .context("failed to connect to database")?;

    let store = Arc::new(PgStore::new(pool.clone()));
    let queue_config = QueueConfig::default()
        .with_max_attempts(queue.max_attempts)
        .with_visibility_timeout(Duration::from_secs(queue.visibility_timeout_secs));
    let jobs = PgJobQueue::new(pool, queue_config);
    let bus = BroadcastEventBus::default();
    spawn_event_log(bus.subscribe());

    Ok(Arc::new(WorkflowRunner::new(
        store.clone(),
        store,
        Arc::new(jobs),
        Arc::new(ExecutorRegistry::builder().with_builtins().build()),
        Arc::new(bus),
    )))
}

/// Log every lifecycle event until the bus closes.
fn spawn_event_log(mut rx: broadcast::Receiver<WorkflowEvent>) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => info!(event = event.name(), execution_id = %event.execution_id(), "lifecycle event"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => warn!(skipped, "event log lagging"),
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

async fn run_in_memory(
    path: &Path,
    payload: &str,
    triggered_by: Option<String>,
    max_steps: usize,
) -> Result<()> {
    let definition = read_definition(path)?;
    let payload: Payload = serde_json::from_str(payload).context("--payload must be a JSON object")?;

    let store = Arc::new(InMemoryStore::new());
    let workflow_id = definition.id;
    store.insert_workflow(definition);

    let bus = BroadcastEventBus::default();
    let mut events = bus.subscribe();
    let runner = Arc::new(WorkflowRunner::new(
        store.clone(),
        store,
        Arc::new(InMemoryJobQueue::default()),
        Arc::new(ExecutorRegistry::builder().with_builtins().build()),
        Arc::new(bus),
    ));

    let execution_id = runner.start_workflow(workflow_id, payload, triggered_by).await?;
    let steps = Worker::new(runner.clone(), WorkerConfig::default())
        .run_until_idle(max_steps)
        .await;

    while let Ok(event) = events.try_recv() {
        println!("{}", serde_json::to_string(&event)?);
    }

    let details = runner.get_execution(execution_id).await?;
    println!("{}", serde_json::to_string_pretty(&details)?);

    match details.record.status {
        ExecutionStatus::Completed => Ok(()),
        ExecutionStatus::Failed => bail!(
            "execution failed: {}",
            details.record.error_message.unwrap_or_default()
        ),
        status => bail!("execution still {status} after {steps} steps"),
    }
}
