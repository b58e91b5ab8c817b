//! MJPEG-over-HTTP streaming server

// Use jemalloc for better memory management (optional feature)
#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::Result;
use clap::Parser;
use rust_mjpeg_http::config::Config;
use rust_mjpeg_http::server;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "mjpeg-http")]
#[command(about = "Serves a live MJPEG stream over HTTP")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the static file directory
    #[arg(long)]
    static_root: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    fmt().with_env_filter(filter).with_target(false).init();

    info!("MJPEG HTTP server starting");
    info!(config_path = %cli.config, "Loading configuration");

    let mut config = load_config(&cli.config)?;

    if let Some(port) = cli.port {
        config.server.listen_port = port;
    }
    if let Some(root) = cli.static_root {
        config.server.static_root = root;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = tokio::spawn(server::run_server(Arc::new(config), shutdown_rx));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutting down");
            shutdown_tx.send_replace(true);
        }
        // Server ended on its own (bind failure)
        _ = shutdown_tx.closed() => {}
    }

    match server.await? {
        Ok(()) => {
            info!("Server stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Server failed");
            Err(e)
        }
    }
}

fn load_config(path: &str) -> Result<Config> {
    if !Path::new(path).exists() {
        warn!(config_path = %path, "Config file not found, using defaults");
        return Ok(Config::default());
    }

    Ok(Config::load(path)?)
}
