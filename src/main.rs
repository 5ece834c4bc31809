//! Tunnel endpoint server.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌───────────────────────────────────────────────┐
//!                         │                 TUNNEL SERVER                  │
//!   POST /proxy           │  ┌─────────┐   ┌────────────┐   ┌───────────┐ │
//!   Host: dest:port ──────┼─▶│   net   │──▶│    http    │──▶│   pool    │─┼──▶ destination
//!   body: frame           │  │listener │   │ terminator │   │multiplexer│ │    (raw TCP)
//!                         │  └─────────┘   └────────────┘   └─────┬─────┘ │
//!   200 + reply frame ◀───┼────────────────────────────────────────┘       │◀── reply frame
//!                         │                                                │
//!                         │   config · observability · lifecycle          │
//!                         └───────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use http_tunnel::config::{self, TunnelConfig};
use http_tunnel::lifecycle;
use http_tunnel::observability::logging;

#[derive(Parser)]
#[command(name = "tunnel-server")]
#[command(about = "HTTP tunnel endpoint for length-prefixed binary protocols", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => {
            let mut config = TunnelConfig::default();
            config::apply_env_overrides(&mut config)?;
            config::validate_config(&config).map_err(config::ConfigError::Validation)?;
            config
        }
    };

    logging::init(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "tunnel-server starting");
    if let Some(path) = &cli.config {
        tracing::info!(path = %path.display(), "Configuration file loaded");
    }

    lifecycle::run(config).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
