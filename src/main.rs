//! Eco Ledger Daemon
//!
//! Serves the eco-actions JSON API over a local SQLite ledger.
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults
//! eco-ledger
//!
//! # Start with custom config
//! eco-ledger --config /path/to/config.toml
//!
//! # Custom port and data directory
//! eco-ledger --http-port 9000 --storage-dir /data/eco-ledger
//! ```

use anyhow::Context;
use clap::Parser;
use eco_ledger::services::spawn_logging_listener;
use eco_ledger::{Config, HttpServer, LedgerDb, Services};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "eco-ledger")]
#[command(about = "Eco-actions backend with per-challenge leaderboards")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "ECO_LEDGER_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "ECO_LEDGER_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// HTTP API port
    #[arg(long, env = "ECO_LEDGER_HTTP_PORT")]
    http_port: Option<u16>,

    /// Maximum pooled SQLite connections
    #[arg(long)]
    pool_size: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("eco_ledger=info".parse()?))
        .init();

    let args = Args::parse();

    // Load config
    let mut config = match &args.config {
        Some(config_path) => Config::load(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?,
        None => Config::default(),
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    if let Some(pool_size) = args.pool_size {
        config.pool_size = pool_size;
    }

    info!(
        storage_dir = %config.storage_dir.display(),
        http_port = config.http_port,
        pool_size = config.pool_size,
        "Starting eco-ledger"
    );

    // Ensure storage directory exists
    tokio::fs::create_dir_all(&config.storage_dir).await?;

    // Save default config if it doesn't exist
    let config_path = config.config_path();
    if !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let db = LedgerDb::open(&config.db_path(), config.pool_size, config.busy_timeout_ms)
        .context("Failed to open ledger database")?;
    let stats = db.stats()?;
    info!(
        challenges = stats.challenge_count,
        actions = stats.action_count,
        entries = stats.entry_count,
        "Ledger database ready"
    );

    let services = Arc::new(Services::new(Arc::new(db)));
    let _listener = spawn_logging_listener(services.events.clone());

    let bind_addr: SocketAddr = format!("{}:{}", config.bind_address, config.http_port)
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.bind_address))?;
    let server = Arc::new(HttpServer::new(services, bind_addr));

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    Ok(())
}
