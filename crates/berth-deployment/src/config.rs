//! Host deployment configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Modification times this close to "now" are not trusted during periodic
/// checks; many file systems only record whole seconds.
pub const FILE_MODIFICATION_RESOLUTION_MS: u64 = 1000;

/// Deployment settings of one host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Host name, used in events and logs
    #[serde(default = "default_host_name")]
    pub name: String,

    /// Directory holding archives and exploded directories
    #[serde(default = "default_app_base")]
    pub app_base: PathBuf,

    /// Directory holding standalone descriptors
    #[serde(default = "default_config_base")]
    pub config_base: PathBuf,

    /// Application-base names matching this pattern are never deployed
    #[serde(default)]
    pub deploy_ignore: Option<String>,

    /// Expand archives into the application base
    #[serde(default = "default_true")]
    pub unpack_archives: bool,

    /// Honour descriptors embedded in archives and directories
    #[serde(default = "default_true")]
    pub deploy_descriptor: bool,

    /// Copy embedded descriptors out to the configuration base
    #[serde(default)]
    pub copy_descriptor: bool,

    /// Run periodic checks; also enables the modification-time tolerance
    #[serde(default = "default_true")]
    pub auto_deploy: bool,

    /// Deploy everything found when the engine starts
    #[serde(default = "default_true")]
    pub deploy_on_startup: bool,

    /// Retire older parallel versions once they have no active sessions
    #[serde(default)]
    pub undeploy_old_versions: bool,

    /// Create missing base directories on start
    #[serde(default = "default_true")]
    pub create_dirs: bool,

    /// Lifecycle listener type attached to every deployed application
    #[serde(default = "default_listener")]
    pub listener: String,

    /// Reload resources every application watches, relative to its content root
    #[serde(default = "default_watched_resources")]
    pub default_watched_resources: Vec<String>,

    /// Process-wide defaults files; tracked as redeploy resources, never deleted
    #[serde(default)]
    pub global_defaults: Vec<PathBuf>,

    /// Upper bound on parallel deployments within a discovery batch
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_deployments: usize,

    /// Delay before a missing redeploy resource is declared removed
    #[serde(default = "default_recheck_delay")]
    pub transient_recheck_delay_ms: u64,
}

impl HostConfig {
    /// Configuration rooted at `app_base`, with descriptors in `config_base`
    pub fn new(app_base: impl Into<PathBuf>, config_base: impl Into<PathBuf>) -> Self {
        Self {
            app_base: app_base.into(),
            config_base: config_base.into(),
            ..Self::default()
        }
    }

    pub fn transient_recheck_delay(&self) -> Duration {
        Duration::from_millis(self.transient_recheck_delay_ms)
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            name: default_host_name(),
            app_base: default_app_base(),
            config_base: default_config_base(),
            deploy_ignore: None,
            unpack_archives: true,
            deploy_descriptor: true,
            copy_descriptor: false,
            auto_deploy: true,
            deploy_on_startup: true,
            undeploy_old_versions: false,
            create_dirs: true,
            listener: default_listener(),
            default_watched_resources: default_watched_resources(),
            global_defaults: Vec::new(),
            max_concurrent_deployments: default_max_concurrent(),
            transient_recheck_delay_ms: default_recheck_delay(),
        }
    }
}

fn default_host_name() -> String {
    "localhost".to_string()
}

fn default_app_base() -> PathBuf {
    PathBuf::from("apps")
}

fn default_config_base() -> PathBuf {
    PathBuf::from("conf/localhost")
}

fn default_true() -> bool {
    true
}

fn default_listener() -> String {
    crate::listener::DEFAULT_LISTENER.to_string()
}

fn default_watched_resources() -> Vec<String> {
    vec!["WEB-INF/web.xml".to_string()]
}

fn default_max_concurrent() -> usize {
    4
}

fn default_recheck_delay() -> u64 {
    500
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HostConfig::default();
        assert!(config.unpack_archives);
        assert!(config.deploy_descriptor);
        assert!(!config.copy_descriptor);
        assert!(!config.undeploy_old_versions);
        assert_eq!(config.listener, "default");
        assert_eq!(config.transient_recheck_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: HostConfig = toml::from_str(
            r#"
            name = "example.org"
            app_base = "/srv/apps"
            undeploy_old_versions = true
            deploy_ignore = "\\.bak$"
            "#,
        )
        .unwrap();

        assert_eq!(config.name, "example.org");
        assert_eq!(config.app_base, PathBuf::from("/srv/apps"));
        assert_eq!(config.config_base, PathBuf::from("conf/localhost"));
        assert!(config.undeploy_old_versions);
        assert!(config.auto_deploy);
        assert_eq!(config.max_concurrent_deployments, 4);
    }
}
