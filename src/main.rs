//! `taskyard-worker`: the consumer process (`spec.md` §2, C4+C5+C6).
//!
//! Connects to the Task Journal and Queue Store, registers the four
//! in-scope handlers, then runs `workersPerProcess` claim loops plus one
//! Recovery Loop until `SIGINT`/`SIGTERM`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use taskyard::config::Config;
use taskyard::graph::{GraphEngine, HttpGraphEngine};
use taskyard::handlers::{
    AddEpisodeHandler, DeduplicateEntitiesHandler, RebuildCommunitiesHandler,
    IncrementalRefreshHandler,
};
use taskyard::journal::TaskJournal;
use taskyard::producer::Producer;
use taskyard::queue::{QueueStore, RedisQueueStore};
use taskyard::recovery::run_recovery_loop;
use taskyard::registry::HandlerRegistry;
use taskyard::worker::{spawn_pool, WorkerPoolDeps};

/// CLI surface for the worker binary.
#[derive(Parser, Debug)]
#[command(name = "taskyard-worker", about = "Task orchestrator worker process")]
struct Cli {
    /// Path to a TOML config file; overridden by `TASKYARD_*` env vars.
    #[arg(long, default_value = "taskyard.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    taskyard::logging::init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config).context("loading configuration")?;

    info!(
        workers_per_process = config.workers_per_process,
        recovery_period_seconds = config.recovery_period_seconds,
        "taskyard-worker starting"
    );

    let journal = TaskJournal::connect(&config.database_url)
        .await
        .context("connecting to the task journal")?;
    let queue: Arc<dyn QueueStore> = Arc::new(
        RedisQueueStore::connect(&config.redis_url)
            .await
            .context("connecting to the queue store")?,
    );
    let graph: Arc<dyn GraphEngine> = Arc::new(HttpGraphEngine::new(config.graph_engine_url.clone()));
    let producer = Producer::new(journal.clone(), Arc::clone(&queue));

    let registry = Arc::new(build_registry());
    config
        .validate_group_lock_ttl(registry.max_timeout_seconds(config.default_handler_timeout_seconds))
        .context("validating group lock ttl against registered handler timeouts")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let deps = WorkerPoolDeps {
        journal: journal.clone(),
        queue: Arc::clone(&queue),
        registry: Arc::clone(&registry),
        graph,
        producer,
        sample_size: usize::try_from(config.active_groups_sample_size).unwrap_or(5),
        group_lock_ttl_seconds: config.group_lock_ttl_seconds,
        default_handler_timeout_seconds: config.default_handler_timeout_seconds,
    };

    let workers = spawn_pool(config.workers_per_process, deps, shutdown_rx.clone());

    let recovery_handle = tokio::spawn(run_recovery_loop(
        journal,
        queue,
        registry,
        std::time::Duration::from_secs(config.recovery_period_seconds),
        config.default_handler_timeout_seconds,
        shutdown_rx,
    ));

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, draining in-flight work");
    let _ = shutdown_tx.send(true);

    for handle in workers {
        let _ = handle.await;
    }
    let _ = recovery_handle.await;

    info!("taskyard-worker stopped");
    Ok(())
}

/// Every handler in scope (`spec.md` §4.8), registered once at startup
/// before the Worker Pool begins its loop (`spec.md` §4.5).
fn build_registry() -> HandlerRegistry {
    let registry = HandlerRegistry::new();
    registry.register(Arc::new(AddEpisodeHandler));
    registry.register(Arc::new(RebuildCommunitiesHandler));
    registry.register(Arc::new(DeduplicateEntitiesHandler));
    registry.register(Arc::new(IncrementalRefreshHandler));
    registry
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
