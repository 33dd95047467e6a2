//! # Herald Server
//!
//! Realtime WebSocket notification server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! herald
//!
//! # Run with custom config
//! herald --config /path/to/herald.toml
//!
//! # Run with environment variables
//! HERALD_PORT=8080 HERALD_HOST=0.0.0.0 herald
//! ```

use anyhow::Result;
use clap::Parser;
use herald_server::{config::Config, handlers};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line arguments.
#[derive(Debug, Parser)]
#[command(name = "herald", version, about = "Realtime WebSocket notification server")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "HERALD_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "herald=info,herald_server=info,herald_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load(args.config.as_deref())?;

    tracing::info!("Starting Herald server on {}:{}", config.host, config.port);

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
