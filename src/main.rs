//! Shoal - unified CLI entrypoint.
//!
//! Usage:
//!   shoal start [--config shoal.toml]

use anyhow::Result;
use clap::{Parser, Subcommand};
use shoal::{Config, Server};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "shoal", about = "Redis-compatible KV node with snapshot replication")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node and serve coordinator connections.
    Start,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shoal=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Start => run_start(config).await,
    }
}

async fn run_start(config: Config) -> Result<()> {
    let listener = TcpListener::bind(&config.server.bind).await?;
    tracing::info!("shoal listening on {}", listener.local_addr()?);

    let server = Arc::new(Server::new(config));
    server.serve(listener).await?;
    Ok(())
}
