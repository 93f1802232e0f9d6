//! Keyhole monitor CLI.
//!
//! One invocation is one reconciliation cycle; scheduling is left to cron
//! or a systemd timer.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use keyhole_core::{monitor, CatalogStore, MonitorConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "keyhole-monitor")]
#[command(about = "Watches the USGS declassified imagery catalogs for newly available scenes")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one monitoring cycle (the default)
    Run,
    /// Print per-dataset scene counts and exit
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = MonitorConfig::load(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Stats => {
            let store = CatalogStore::open(&config.database).await?;
            let counts: serde_json::Map<String, serde_json::Value> = store
                .dataset_counts()
                .await?
                .into_iter()
                .map(|(dataset, count)| (dataset, count.into()))
                .collect();
            println!("{}", serde_json::to_string_pretty(&counts)?);
        }
        Command::Run => {
            let summary = monitor::run(&config)
                .await
                .context("monitoring cycle failed")?;
            info!(
                datasets = summary.datasets_processed,
                failed = summary.datasets_failed,
                new_scenes = summary.new_scenes,
                digitized = summary.newly_digitized,
                "cycle complete"
            );
        }
    }
    Ok(())
}
