//! Arbor sync server
//!
//! Serves the sync endpoints over HTTP.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use arbor_server::{Gateway, ServerConfig};

#[derive(Parser)]
#[command(name = "arbor-server")]
#[command(about = "Arbor sync server")]
#[command(version)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on (overrides the config file)
    #[arg(short, long)]
    bind: Option<String>,

    /// SQLite database file (overrides the config file)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("arbor_server={},arbor_core={}", level, level))
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = ServerConfig::load(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    if let Some(database) = cli.database {
        config.database = database;
    }

    info!(
        "Using database {:?}, {} token(s) configured",
        config.database,
        config.tokens.len()
    );
    let gateway = Arc::new(Gateway::from_config(&config)?);

    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;

    arbor_server::serve(listener, gateway, shutdown_signal()).await
}
