//! Deployed-application registry
//!
//! In-memory map from unit name to its [`TrackedApplication`]. Nothing is
//! persisted: on restart the registry is rebuilt by rediscovering units.

use berth_types::TrackedApplication;
use dashmap::DashMap;

/// Registry of tracked deployments, keyed by unit name
#[derive(Debug, Default)]
pub struct DeployedApplicationRegistry {
    apps: DashMap<String, TrackedApplication>,
}

impl DeployedApplicationRegistry {
    pub fn new() -> Self {
        Self {
            apps: DashMap::new(),
        }
    }

    /// Insert or replace the entry for `app.name()`
    pub fn insert(&self, app: TrackedApplication) -> Option<TrackedApplication> {
        self.apps.insert(app.name().to_string(), app)
    }

    /// Snapshot of one entry
    pub fn get(&self, name: &str) -> Option<TrackedApplication> {
        self.apps.get(name).map(|a| a.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.apps.contains_key(name)
    }

    pub fn remove(&self, name: &str) -> Option<TrackedApplication> {
        self.apps.remove(name).map(|(_, app)| app)
    }

    /// Write back an entry only if it is still registered.
    ///
    /// Returns `false` when the entry was removed in the meantime.
    pub fn replace_existing(&self, app: TrackedApplication) -> bool {
        match self.apps.get_mut(app.name()) {
            Some(mut entry) => {
                *entry = app;
                true
            }
            None => false,
        }
    }

    /// Mutate an entry in place
    pub fn update<F>(&self, name: &str, f: F) -> bool
    where
        F: FnOnce(&mut TrackedApplication),
    {
        match self.apps.get_mut(name) {
            Some(mut entry) => {
                f(entry.value_mut());
                true
            }
            None => false,
        }
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.apps.iter().map(|a| a.key().clone()).collect();
        names.sort();
        names
    }

    /// Snapshot of all entries, sorted by name
    pub fn list(&self) -> Vec<TrackedApplication> {
        let mut apps: Vec<TrackedApplication> =
            self.apps.iter().map(|a| a.value().clone()).collect();
        apps.sort_by(|a, b| a.name().cmp(b.name()));
        apps
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}
