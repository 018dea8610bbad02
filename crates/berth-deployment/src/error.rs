//! Deployment error types

use berth_registry::RegistryError;
use std::path::PathBuf;
use thiserror::Error;

/// Deployment errors
#[derive(Debug, Error)]
pub enum DeployError {
    /// File-system failure while expanding or copying; the unit stays
    /// undeployed and is retried by the next discovery pass
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Archive entry would land outside the expansion directory
    #[error("Archive {archive} contains illegal entry {entry}")]
    IllegalEntry { archive: PathBuf, entry: String },

    #[error("Failed to parse descriptor {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Unknown lifecycle listener type: {0}")]
    UnknownListener(String),

    #[error("Application base {0} is not a directory")]
    InvalidAppBase(PathBuf),

    #[error("Invalid deploy ignore pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Deployment task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Deployment pool closed")]
    PoolClosed,
}

impl DeployError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| DeployError::Io { path, source }
    }

    /// Whether the unit should still occupy a deployed slot as a failed
    /// placeholder instead of being left undeployed
    pub fn yields_placeholder(&self) -> bool {
        matches!(
            self,
            DeployError::IllegalEntry { .. }
                | DeployError::Parse { .. }
                | DeployError::UnknownListener(_)
        )
    }
}

/// Result type for deployment operations
pub type Result<T> = std::result::Result<T, DeployError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_classification() {
        let parse = DeployError::Parse {
            path: PathBuf::from("/conf/shop.toml"),
            reason: "unexpected key".into(),
        };
        assert!(parse.yields_placeholder());

        let io = DeployError::io("/apps/shop")(std::io::Error::other("disk full"));
        assert!(!io.yields_placeholder());
        assert!(io.to_string().contains("/apps/shop"));
    }
}
