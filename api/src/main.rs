//! `taskyard-api`: the HTTP producer surface (`spec.md` §4.3, C3+C7).
//!
//! A thin Axum wrapper around the [`taskyard::producer::Producer`] and
//! [`taskyard::control::Controller`] handles; it holds no orchestration
//! logic of its own, matching the control-plane's split between its API
//! server and the agents that actually do the work.

mod error;
mod routes;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use taskyard::config::Config;
use taskyard::control::Controller;
use taskyard::journal::TaskJournal;
use taskyard::producer::Producer;
use taskyard::queue::{QueueStore, RedisQueueStore};

use crate::state::AppState;

/// CLI surface for the API binary.
#[derive(Parser, Debug)]
#[command(name = "taskyard-api", about = "Task orchestrator HTTP producer API")]
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

    let journal = TaskJournal::connect(&config.database_url)
        .await
        .context("connecting to the task journal")?;
    let queue: Arc<dyn QueueStore> = Arc::new(
        RedisQueueStore::connect(&config.redis_url)
            .await
            .context("connecting to the queue store")?,
    );

    let state = AppState {
        producer: Producer::new(journal.clone(), Arc::clone(&queue)),
        controller: Controller::new(journal, queue),
    };

    let app = routes::build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.api_bind_addr)
        .await
        .with_context(|| format!("binding {}", config.api_bind_addr))?;

    info!(addr = %config.api_bind_addr, "taskyard-api listening");
    axum::serve(listener, app)
        .await
        .context("serving HTTP")?;

    Ok(())
}
