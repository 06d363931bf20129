//! Prickle Binary Entry Point
//!
//! Runs every configured collector and the render timers until interrupted.
//! Core functionality is provided by the `prickle` library crate.

use std::path::PathBuf;

use clap::Parser;
use prickle::{AppConfig, Orchestrator};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Prickle - Service Statistics Grapher
#[derive(Parser, Debug)]
#[command(name = "prickle", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/config.yaml",
        env = "PRICKLE_CONFIG"
    )]
    config: PathBuf,

    /// Create missing databases before starting
    #[arg(long, env = "PRICKLE_CREATE_DATABASES")]
    create_databases: bool,

    /// Recreate databases that already exist (implies --create-databases)
    #[arg(long)]
    overwrite: bool,

    /// rrdtool binary (overrides config file)
    #[arg(long, env = "PRICKLE_RRDTOOL")]
    rrdtool: Option<PathBuf>,

    /// Database directory (overrides config file)
    #[arg(long, env = "PRICKLE_DATABASE_PATH")]
    database_path: Option<PathBuf>,

    /// Image directory (overrides config file)
    #[arg(long, env = "PRICKLE_IMAGE_PATH")]
    image_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,prickle=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Prickle - Service Statistics Grapher");

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration from file
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let mut config = AppConfig::load_with_plugin_path(&cli.config)?;

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(rrdtool) = cli.rrdtool {
        config.rrdtool = rrdtool;
    }
    if let Some(database_path) = cli.database_path {
        config.database_path = database_path;
    }
    if let Some(image_path) = cli.image_path {
        config.image_path = image_path;
    }

    tracing::info!(
        "Databases: {}, Images: {}, Plugins: {}",
        config.database_path.display(),
        config.image_path.display(),
        config.plugins.len(),
    );

    let orchestrator = Orchestrator::from_config(config)?;

    if cli.create_databases || cli.overwrite {
        tracing::info!(overwrite = cli.overwrite, "Creating databases...");
        orchestrator.create_databases(cli.overwrite).await?;
    }

    orchestrator.start().await?;
    tracing::info!("Press Ctrl+C to shutdown");

    shutdown_signal().await;

    tracing::info!("Shutting down...");
    orchestrator.shutdown().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
