//! Lifecycle listener plugin table
//!
//! Listener types are resolved by name from a table of constructors filled
//! at startup. An unknown name is an explicit error.

use crate::config::HostConfig;
use crate::error::{DeployError, Result};
use berth_registry::{AppInstance, LifecycleListener, RegistryError};
use std::collections::HashMap;
use std::sync::Arc;

/// Name of the built-in configuring listener
pub const DEFAULT_LISTENER: &str = "default";

/// Builds a listener for one application
pub type ListenerConstructor =
    Box<dyn Fn(&HostConfig) -> Arc<dyn LifecycleListener> + Send + Sync>;

/// Registry of listener constructors keyed by type name
pub struct ListenerFactory {
    constructors: HashMap<String, ListenerConstructor>,
}

impl ListenerFactory {
    /// Empty table
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Table with the built-in listener registered
    pub fn new() -> Self {
        let mut factory = Self::empty();
        factory.register(DEFAULT_LISTENER, |config: &HostConfig| {
            Arc::new(DefaultConfigurer::new(config.default_watched_resources.clone()))
                as Arc<dyn LifecycleListener>
        });
        factory
    }

    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&HostConfig) -> Arc<dyn LifecycleListener> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Box::new(constructor));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn create(&self, name: &str, config: &HostConfig) -> Result<Arc<dyn LifecycleListener>> {
        self.constructors
            .get(name)
            .map(|constructor| constructor(config))
            .ok_or_else(|| DeployError::UnknownListener(name.to_string()))
    }
}

impl Default for ListenerFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// Declares the host's default watched resources and the descriptor's own
/// watched resources, and refuses to start without content
pub struct DefaultConfigurer {
    default_watched: Vec<String>,
}

impl DefaultConfigurer {
    pub fn new(default_watched: Vec<String>) -> Self {
        Self { default_watched }
    }
}

impl LifecycleListener for DefaultConfigurer {
    fn kind(&self) -> &str {
        DEFAULT_LISTENER
    }

    fn before_start(&self, app: &AppInstance) -> berth_registry::Result<()> {
        if let Some(location) = app.content_location() {
            if !location.exists() {
                return Err(RegistryError::Listener {
                    listener: DEFAULT_LISTENER.to_string(),
                    name: app.name(),
                    reason: format!("content location {} does not exist", location.display()),
                });
            }
        }

        for resource in &self.default_watched {
            app.add_watched_resource(resource.clone());
        }
        if let Some(descriptor) = app.descriptor() {
            for resource in &descriptor.watched_resources {
                app.add_watched_resource(resource.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_registry::AppKind;
    use berth_types::{AppDescriptor, UnitIdentity};

    #[test]
    fn test_unknown_listener() {
        let factory = ListenerFactory::new();
        let err = factory
            .create("org.example.Custom", &HostConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, DeployError::UnknownListener(_)));
        assert!(factory.contains(DEFAULT_LISTENER));
    }

    #[test]
    fn test_default_configurer_declares_resources() {
        let listener = ListenerFactory::new()
            .create(DEFAULT_LISTENER, &HostConfig::default())
            .unwrap();
        let descriptor = AppDescriptor {
            watched_resources: vec!["conf/limits.conf".into()],
            ..Default::default()
        };
        let app = AppInstance::new(
            UnitIdentity::from_file_name("shop.war", true),
            AppKind::Configured(descriptor),
        );
        app.add_listener(listener);

        app.start().unwrap();
        assert_eq!(
            app.watched_resources(),
            vec!["WEB-INF/web.xml", "conf/limits.conf"]
        );
    }

    #[test]
    fn test_missing_content_fails_start() {
        let dir = tempfile::tempdir().unwrap();
        let app = AppInstance::new(
            UnitIdentity::from_file_name("shop.war", true),
            AppKind::Configured(AppDescriptor::default()),
        );
        app.set_content_location(Some(dir.path().join("gone")));
        app.add_listener(Arc::new(DefaultConfigurer::new(Vec::new())));

        assert!(app.start().is_err());
        assert!(!app.is_available());
    }
}
