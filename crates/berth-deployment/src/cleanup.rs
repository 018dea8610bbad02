//! Deletion of tracked resources after an undeploy
//!
//! Only resources directly inside the application base, or descriptor files
//! directly inside the configuration base, are ever deleted. Shared defaults
//! files are never deleted.

use crate::fsutil::remove_path;
use berth_types::{has_descriptor_extension, HOST_DEFAULTS_FILE};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Scoped deleter for undeployed resources
#[derive(Debug, Clone)]
pub struct ResourceCleaner {
    app_base: PathBuf,
    config_base: PathBuf,
    protected: Vec<PathBuf>,
}

impl ResourceCleaner {
    /// `app_base` and `config_base` must be canonical
    pub fn new(app_base: PathBuf, config_base: PathBuf, protected: Vec<PathBuf>) -> Self {
        Self {
            app_base,
            config_base,
            protected,
        }
    }

    pub fn is_deletable(&self, resource: &Path) -> bool {
        if !resource.is_absolute() {
            warn!(resource = %resource.display(), "Refusing to delete relative resource");
            return false;
        }

        let file_name = match resource.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => return false,
        };
        if file_name == HOST_DEFAULTS_FILE || self.protected.iter().any(|p| p == resource) {
            return false;
        }

        let parent = match resource.parent().map(fs::canonicalize) {
            Some(Ok(parent)) => parent,
            Some(Err(e)) => {
                debug!(resource = %resource.display(), error = %e, "Cannot resolve resource location");
                return false;
            }
            None => return false,
        };

        parent == self.app_base
            || (parent == self.config_base && has_descriptor_extension(file_name))
    }

    /// Delete every deletable resource; returns the paths removed
    pub fn delete_resources(&self, resources: &[PathBuf]) -> Vec<PathBuf> {
        let mut deleted = Vec::new();
        for resource in resources {
            if !self.is_deletable(resource) {
                continue;
            }
            if !resource.exists() {
                continue;
            }
            match remove_path(resource) {
                Ok(()) => {
                    debug!(resource = %resource.display(), "Deleted undeployed resource");
                    deleted.push(resource.clone());
                }
                Err(e) => {
                    warn!(resource = %resource.display(), error = %e, "Failed to delete resource")
                }
            }
        }
        deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        _root: tempfile::TempDir,
        apps: PathBuf,
        conf: PathBuf,
        outside: PathBuf,
    }

    fn fixture() -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let base = fs::canonicalize(root.path()).unwrap();
        let apps = base.join("apps");
        let conf = base.join("conf");
        let outside = base.join("shared");
        for dir in [&apps, &conf, &outside] {
            fs::create_dir(dir).unwrap();
        }
        Fixture {
            _root: root,
            apps,
            conf,
            outside,
        }
    }

    #[test]
    fn test_scope() {
        let f = fixture();
        let cleaner = ResourceCleaner::new(f.apps.clone(), f.conf.clone(), Vec::new());

        assert!(cleaner.is_deletable(&f.apps.join("shop.war")));
        assert!(cleaner.is_deletable(&f.apps.join("shop")));
        assert!(cleaner.is_deletable(&f.conf.join("shop.toml")));
        assert!(!cleaner.is_deletable(&f.conf.join("shop.txt")));
        assert!(!cleaner.is_deletable(&f.conf.join(HOST_DEFAULTS_FILE)));
        assert!(!cleaner.is_deletable(&f.apps.join("shop/WEB-INF/web.xml")));
        assert!(!cleaner.is_deletable(&f.outside.join("shop.war")));
        assert!(!cleaner.is_deletable(Path::new("shop.war")));
    }

    #[test]
    fn test_protected_defaults_survive() {
        let f = fixture();
        let defaults = f.conf.join("global.toml");
        fs::write(&defaults, b"").unwrap();
        let cleaner = ResourceCleaner::new(f.apps.clone(), f.conf.clone(), vec![defaults.clone()]);

        assert!(cleaner.delete_resources(&[defaults.clone()]).is_empty());
        assert!(defaults.exists());
    }

    #[test]
    fn test_delete_only_inside_bases() {
        let f = fixture();
        let inside = f.apps.join("shop.war");
        let external = f.outside.join("shop.war");
        fs::write(&inside, b"").unwrap();
        fs::write(&external, b"").unwrap();
        let cleaner = ResourceCleaner::new(f.apps.clone(), f.conf.clone(), Vec::new());

        let deleted = cleaner.delete_resources(&[inside.clone(), external.clone()]);
        assert_eq!(deleted, vec![inside.clone()]);
        assert!(!inside.exists());
        assert!(external.exists());
    }
}
