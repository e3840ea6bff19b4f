//! dbwatch server - keeps the database registry in sync with watched roots.
//!
//! Runs the orchestrator until Ctrl-C and logs every server event.

use anyhow::{Context, Result};
use clap::Parser;
use dbwatch_core::{Orchestrator, ServerConfig, ServerEvent};
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dbwatch-server")]
#[command(about = "Track SQLite database files under one or more directories")]
struct Args {
    /// Directories to watch (overrides the config file)
    paths: Vec<PathBuf>,

    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Location of the core registry database
    #[arg(long)]
    core_db: Option<PathBuf>,

    /// Poll the filesystem instead of using native notifications
    #[arg(long)]
    poll: bool,

    /// Poll interval in milliseconds
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// How long a file must stay unchanged before a write is reported
    #[arg(long)]
    stability_ms: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => ServerConfig::default(),
        };

        if !self.paths.is_empty() {
            config.watcher.paths = self.paths;
        }
        if let Some(core_db) = self.core_db {
            config.core_db_path = core_db;
        }
        if self.poll {
            config.watcher.use_polling = true;
        }
        if let Some(ms) = self.poll_interval_ms {
            config.watcher.poll_interval_ms = ms;
        }
        if let Some(ms) = self.stability_ms {
            config.watcher.stability_window_ms = ms;
        }
        Ok(config)
    }
}

fn init_logging(debug: bool, json: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

async fn log_events(mut events: tokio::sync::broadcast::Receiver<ServerEvent>) {
    loop {
        match events.recv().await {
            Ok(ServerEvent::Error { error }) => warn!(event = "error", "{}", error),
            Ok(event) => match serde_json::to_string(&event) {
                Ok(payload) => info!(event = event.name(), "{}", payload),
                Err(e) => warn!("Failed to encode {}: {}", event.name(), e),
            },
            Err(RecvError::Lagged(skipped)) => warn!("Event log skipped {} events", skipped),
            Err(RecvError::Closed) => break,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug, args.json);

    let config = args.into_config()?;
    info!("Core store: {}", config.core_db_path.display());

    let server = Orchestrator::new(config);
    let event_log = tokio::spawn(log_events(server.subscribe()));

    server.start().await.context("Failed to start dbwatch")?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    server.stop().await.context("Failed to stop cleanly")?;
    drop(server);
    let _ = event_log.await;

    Ok(())
}
