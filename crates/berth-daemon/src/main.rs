//! Berth Daemon - hot deployment service for one host
//!
//! The daemon:
//! - deploys every unit found when it starts
//! - periodically checks deployed units for changes and discovers new ones
//! - publishes deployment events to the log

use berth_daemon::{DaemonConfig, DaemonError, DaemonResult, Server};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Berth Daemon CLI
#[derive(Parser)]
#[command(name = "berthd")]
#[command(about = "Berth Daemon - hot deployment service", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "BERTH_CONFIG")]
    config: Option<String>,

    /// Application base directory
    #[arg(long, env = "BERTH_APP_BASE")]
    app_base: Option<PathBuf>,

    /// Configuration base directory
    #[arg(long, env = "BERTH_CONFIG_BASE")]
    config_base: Option<PathBuf>,

    /// Seconds between reconciliation passes
    #[arg(long, env = "BERTH_CHECK_INTERVAL")]
    interval: Option<u64>,

    /// Log level
    #[arg(long, env = "BERTH_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "BERTH_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = DaemonConfig::load(cli.config.as_deref())?;

    // Override with CLI args
    if let Some(app_base) = cli.app_base {
        config.host.app_base = app_base;
    }
    if let Some(config_base) = cli.config_base {
        config.host.config_base = config_base;
    }
    if let Some(interval) = cli.interval {
        if interval == 0 {
            return Err(DaemonError::Config(
                "Check interval must be at least one second".to_string(),
            ));
        }
        config.scheduler.check_interval_secs = interval;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Berth daemon");

    let server = Server::new(config)?;
    server.run().await
}
