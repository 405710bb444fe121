//! Process entry: argument parsing, logging setup, startup sequence.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

use crate::config::Config;
use crate::ingest;
use crate::shell::Shell;
use crate::state::AppState;

/// Handle used by the shell to retune the log filter at runtime.
pub type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Read-only npm-protocol registry for Unity Package Manager clients.
#[derive(Parser)]
#[command(name = "upm-registry")]
#[command(about = "Serve local .tgz packages over the npm registry protocol")]
pub struct Cli {
    /// Path to the JSON configuration file
    #[arg(default_value = "./config.json")]
    pub config: PathBuf,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Configuration problems are fatal; there is no server to keep alive
    // yet and nothing sensible to serve.
    let config =
        Config::load(&cli.config).with_context(|| format!("loading {}", cli.config.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.verbosity.filter_directive()));
    let (filter_layer, filter_handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        config = %cli.config.display(),
        verbosity = %config.verbosity,
        "configuration loaded"
    );

    let packages_dir = std::fs::canonicalize(&config.path)
        .with_context(|| format!("packages directory {}", config.path.display()))?;
    info!(packages_dir = %packages_dir.display(), "📦 serving packages from here");

    // Initial scan, then bring the listeners up.
    let scan_dir = packages_dir.clone();
    let extensions = config.extensions.clone();
    let (catalog, _stats) =
        tokio::task::spawn_blocking(move || ingest::scan(&scan_dir, &extensions)).await?;

    let state = Arc::new(AppState::new(packages_dir, catalog));
    let mut shell = Shell::new(state, config, filter_handle);
    shell.start().await;
    shell.run().await
}
