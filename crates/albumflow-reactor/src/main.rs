#![warn(missing_docs)]

//! `albumflow` binary.

use anyhow::Result;
use albumflow_reactor::cli::Cli;
use albumflow_reactor::logging::init_tracing;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    init_tracing(&config.logging)?;

    if !cli.config.exists() {
        tracing::warn!("Config file not found, using defaults: {}", cli.config.display());
    }
    tracing::info!("AlbumFlow starting on topic {}", config.topic);

    cli.run(config).await
}
