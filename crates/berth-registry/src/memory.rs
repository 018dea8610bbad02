//! In-memory container
//!
//! Holds application instances in a concurrent map. Suitable for embedding
//! and for tests; a real servlet-style container plugs in through [`Host`].

use crate::error::{RegistryError, Result};
use crate::host::{AppInstance, Host};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// In-memory host
pub struct InMemoryHost {
    name: String,
    children: DashMap<String, Arc<AppInstance>>,
}

impl InMemoryHost {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl Default for InMemoryHost {
    fn default() -> Self {
        Self::new("localhost")
    }
}

impl Host for InMemoryHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn add_child(&self, app: Arc<AppInstance>) -> Result<()> {
        let name = app.name();
        match self.children.entry(name.clone()) {
            Entry::Occupied(_) => return Err(RegistryError::AlreadyExists(name)),
            Entry::Vacant(slot) => {
                slot.insert(app.clone());
            }
        }
        debug!(host = %self.name, app = %name, "Child added");

        // Started outside the map guard; listeners may call back into the host
        app.start().map_err(|e| {
            warn!(host = %self.name, app = %name, error = %e, "Child failed to start");
            e
        })
    }

    fn remove_child(&self, name: &str) -> Option<Arc<AppInstance>> {
        let (_, app) = self.children.remove(name)?;
        app.stop();
        debug!(host = %self.name, app = %name, "Child removed");
        Some(app)
    }

    fn find_child(&self, name: &str) -> Option<Arc<AppInstance>> {
        self.children.get(name).map(|c| c.value().clone())
    }

    fn children(&self) -> Vec<Arc<AppInstance>> {
        let mut children: Vec<Arc<AppInstance>> =
            self.children.iter().map(|c| c.value().clone()).collect();
        children.sort_by_key(|c| c.name());
        children
    }
}
