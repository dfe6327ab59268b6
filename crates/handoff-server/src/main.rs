//! handoff-server - Handoff session coordinator host
//!
//! Restores persisted sessions, runs the periodic cleanup sweep and tears
//! sessions down on shutdown.

use anyhow::Context;
use clap::Parser;
use handoff_core::backend::TmuxBackend;
use handoff_core::Database;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod cli;
mod config;
mod pid;
mod state;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    init_logging(cli.json_logs)?;

    info!("handoff-server v{}", env!("CARGO_PKG_VERSION"));

    let config = config::Config::load(&cli)?;
    let coordinator = config.coordinator()?;
    info!("Config loaded from {:?}", config.config_path);

    let _pid = pid::PidFile::acquire(&config.pid_file)?;

    let db = Database::open_path(&config.database_path)
        .with_context(|| format!("Failed to open {}", config.database_path.display()))?;
    let backend = TmuxBackend::new(&coordinator.backend)?;

    let state = state::AppState::new(config, coordinator, db, Arc::new(backend));
    let events = state.spawn_event_logger();

    state.db.ping().context("Database health check failed")?;
    let restored = state.manager.init().await;
    info!(restored, data_dir = %state.config.data_dir.display(), "Server ready");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    let destroyed = state.manager.shutdown().await;
    info!(
        destroyed,
        uptime_secs = state.started_at.elapsed().as_secs(),
        "Sessions torn down"
    );
    events.abort();

    Ok(())
}

fn init_logging(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("handoff_server=info".parse()?)
        .add_directive("handoff_core=info".parse()?);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
    Ok(())
}
