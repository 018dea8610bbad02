//! Tracked deployment state
//!
//! One [`TrackedApplication`] exists per deployed unit. It records the files
//! whose modification should trigger a redeploy or a reload, together with
//! the modification time observed when the entry was last accepted.

use crate::UnitIdentity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Modification time (millis since the epoch) recorded for a sentinel:
/// a resource that does not exist yet but whose appearance matters.
pub const SENTINEL_MTIME: u64 = 0;

/// Insertion-ordered map of watched paths to their last accepted mtime.
///
/// Re-inserting an existing path updates its timestamp in place and keeps
/// its original position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedResources {
    entries: Vec<(PathBuf, u64)>,
}

impl WatchedResources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a resource
    pub fn insert(&mut self, path: impl Into<PathBuf>, modified: u64) {
        let path = path.into();
        match self.entries.iter_mut().find(|(p, _)| *p == path) {
            Some(entry) => entry.1 = modified,
            None => self.entries.push((path, modified)),
        }
    }

    pub fn get(&self, path: &Path) -> Option<u64> {
        self.entries
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, m)| *m)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.get(path).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, u64)> {
        self.entries.iter().map(|(p, m)| (p.as_path(), *m))
    }

    /// Paths in insertion order
    pub fn paths(&self) -> Vec<PathBuf> {
        self.entries.iter().map(|(p, _)| p.clone()).collect()
    }

    /// Paths recorded after the entry at `index`
    pub fn paths_after(&self, index: usize) -> Vec<PathBuf> {
        self.entries
            .iter()
            .skip(index + 1)
            .map(|(p, _)| p.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Deployment state of one deployed unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedApplication {
    pub identity: UnitIdentity,

    /// Whether a descriptor file governs this deployment
    pub has_descriptor: bool,

    /// Changes to these trigger a full redeploy
    pub redeploy_resources: WatchedResources,

    /// Changes to these trigger an in-place reload
    pub reload_resources: WatchedResources,

    /// Last time the watcher or an administrative call serviced this entry
    pub last_serviced: DateTime<Utc>,

    /// Set once the overlapping-directory warning has been logged
    pub logged_dir_warning: bool,
}

impl TrackedApplication {
    pub fn new(identity: UnitIdentity, has_descriptor: bool) -> Self {
        Self {
            identity,
            has_descriptor,
            redeploy_resources: WatchedResources::new(),
            reload_resources: WatchedResources::new(),
            last_serviced: Utc::now(),
            logged_dir_warning: false,
        }
    }

    /// Registry key
    pub fn name(&self) -> &str {
        self.identity.name()
    }

    pub fn touch(&mut self) {
        self.last_serviced = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reinsert_keeps_position() {
        let mut resources = WatchedResources::new();
        resources.insert("/a", 1);
        resources.insert("/b", SENTINEL_MTIME);
        resources.insert("/a", 5);

        assert_eq!(resources.len(), 2);
        assert_eq!(resources.paths(), vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        assert_eq!(resources.get(Path::new("/a")), Some(5));
    }

    #[test]
    fn test_paths_after() {
        let mut resources = WatchedResources::new();
        resources.insert("/a", 1);
        resources.insert("/b", 2);
        resources.insert("/c", 3);

        assert_eq!(
            resources.paths_after(0),
            vec![PathBuf::from("/b"), PathBuf::from("/c")]
        );
        assert!(resources.paths_after(2).is_empty());
    }
}
