//! Registry error types

use thiserror::Error;

/// Registry and container errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Application already exists: {0}")]
    AlreadyExists(String),

    #[error("Application {name} failed to start: {reason}")]
    StartFailed { name: String, reason: String },

    #[error("Lifecycle listener {listener} failed for {name}: {reason}")]
    Listener {
        listener: String,
        name: String,
        reason: String,
    },
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;
