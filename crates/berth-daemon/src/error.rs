//! Error types for berth-daemon

use berth_deployment::DeployError;
use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Deployment engine could not be created
    #[error("Deployment engine error: {0}")]
    Engine(#[from] DeployError),

    /// Scheduler error
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for DaemonError {
    fn from(e: config::ConfigError) -> Self {
        DaemonError::Config(e.to_string())
    }
}

/// Result type for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;
