//! Serviced set
//!
//! Names of units currently undergoing an administrative or deployment
//! operation. This is bookkeeping, not a lock: the periodic reconciliation
//! leaves serviced units alone, but a caller that never marks a unit can
//! still race it.

use dashmap::DashSet;

/// Concurrent set of unit names that reconciliation must not touch
#[derive(Debug, Default)]
pub struct ServicedSet {
    names: DashSet<String>,
}

impl ServicedSet {
    pub fn new() -> Self {
        Self {
            names: DashSet::new(),
        }
    }

    /// Mark a unit as serviced
    pub fn add(&self, name: &str) {
        self.names.insert(name.to_string());
    }

    /// Mark a unit as serviced unless it already is.
    ///
    /// Returns `true` when the caller now owns the mark.
    pub fn try_add(&self, name: &str) -> bool {
        self.names.insert(name.to_string())
    }

    pub fn remove(&self, name: &str) {
        self.names.remove(name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Serviced names, sorted
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.names.iter().map(|n| n.key().clone()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_add_is_exclusive() {
        let serviced = ServicedSet::new();
        assert!(serviced.try_add("/shop"));
        assert!(!serviced.try_add("/shop"));
        assert!(serviced.contains("/shop"));

        serviced.remove("/shop");
        assert!(!serviced.contains("/shop"));
        assert!(serviced.try_add("/shop"));
    }

    #[test]
    fn test_add_is_idempotent() {
        let serviced = ServicedSet::new();
        serviced.add("/a");
        serviced.add("/a");
        assert_eq!(serviced.list(), vec!["/a"]);
    }
}
