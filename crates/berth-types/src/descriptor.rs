//! Application descriptor
//!
//! The configuration object produced by the descriptor parser. A descriptor
//! lives either in the configuration base (`<base>.toml`) or embedded in the
//! unit itself at [`EMBEDDED_DESCRIPTOR`].

use serde::{Deserialize, Serialize};

/// Location of the descriptor inside archives and exploded directories
pub const EMBEDDED_DESCRIPTOR: &str = "META-INF/app.toml";

/// Per-host defaults file in the configuration base; never deleted
pub const HOST_DEFAULTS_FILE: &str = "app.toml.default";

/// Deployment configuration of one application
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppDescriptor {
    /// Content location, absolute or relative to the application base
    pub doc_base: Option<String>,

    /// Lifecycle listener type, overrides the host default
    pub listener: Option<String>,

    /// Whether to expand a packaged archive, overrides the host setting
    pub unpack: Option<bool>,

    /// Whether to copy an embedded descriptor into the configuration base
    pub copy_descriptor: Option<bool>,

    /// Files whose change triggers a reload, relative to the content root
    pub watched_resources: Vec<String>,
}

impl AppDescriptor {
    /// Effective unpack flag given the host setting
    pub fn unpack_or(&self, host_default: bool) -> bool {
        host_default && self.unpack.unwrap_or(true)
    }

    /// Effective copy flag given the host setting
    pub fn copy_descriptor_or(&self, host_default: bool) -> bool {
        host_default || self.copy_descriptor.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_descriptor() {
        let descriptor: AppDescriptor = toml::from_str("").unwrap();
        assert_eq!(descriptor, AppDescriptor::default());
    }

    #[test]
    fn test_parse_full_descriptor() {
        let descriptor: AppDescriptor = toml::from_str(
            r#"
            doc_base = "/srv/shared/shop.war"
            listener = "default"
            unpack = false
            watched_resources = ["WEB-INF/web.xml", "/etc/shop/limits.conf"]
            "#,
        )
        .unwrap();

        assert_eq!(descriptor.doc_base.as_deref(), Some("/srv/shared/shop.war"));
        assert!(!descriptor.unpack_or(true));
        assert_eq!(descriptor.watched_resources.len(), 2);
    }

    #[test]
    fn test_host_unpack_wins_when_disabled() {
        let descriptor = AppDescriptor {
            unpack: Some(true),
            ..Default::default()
        };
        assert!(!descriptor.unpack_or(false));
    }
}
