//! Command-line arguments.

use clap::Parser;
use std::path::PathBuf;

/// Handoff session coordinator server
#[derive(Parser, Debug)]
#[command(name = "handoff-server")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Coordinator config file (defaults to $HANDOFF_DIR/config.toml)
    #[arg(long, env = "HANDOFF_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQLite database path (defaults to $HANDOFF_DIR/sessions.db)
    #[arg(long, env = "HANDOFF_DATABASE")]
    pub database: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}
