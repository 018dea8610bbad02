//! Configuration for berth-daemon

use berth_deployment::HostConfig;
use serde::{Deserialize, Serialize};

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Deployment settings of the managed host
    #[serde(default)]
    pub host: HostConfig,

    /// Scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between periodic reconciliation passes
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_check_interval() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration: defaults, then the optional file, then `BERTH_*`
    /// environment variables (`BERTH_HOST__APP_BASE=/srv/apps`)
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        // Add default configuration
        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        // Add file configuration if provided
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // Nested keys use a double underscore; field names contain single ones
        builder = builder.add_source(
            config::Environment::with_prefix("BERTH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.scheduler.check_interval_secs, 10);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
        assert_eq!(config.host.name, "localhost");
        assert!(config.host.auto_deploy);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("berth.toml");
        fs::write(
            &path,
            r#"
[host]
name = "staging"
app_base = "/srv/berth/apps"
undeploy_old_versions = true

[scheduler]
check_interval_secs = 3
"#,
        )
        .unwrap();

        let config = DaemonConfig::load(path.to_str()).unwrap();
        assert_eq!(config.host.name, "staging");
        assert_eq!(config.host.app_base, PathBuf::from("/srv/berth/apps"));
        assert!(config.host.undeploy_old_versions);
        assert!(config.host.unpack_archives);
        assert_eq!(config.scheduler.check_interval_secs, 3);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = DaemonConfig::load(Some("/nonexistent/berth")).unwrap();
        assert_eq!(config.scheduler.check_interval_secs, 10);
        assert_eq!(config.host.max_concurrent_deployments, 4);
    }
}
