//! Unit discovery
//!
//! Lists the candidate units of one packaging kind in a base directory.
//! Descriptors come from the configuration base; archives and directories
//! come from the application base, where the ignore pattern applies.

use crate::error::Result;
use berth_types::{
    has_archive_extension, has_descriptor_extension, LocatedUnit, UnitIdentity, UnitKind,
};
use regex::Regex;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Infrastructure directory names that are never deployable units
pub const RESERVED_NAMES: [&str; 2] = ["META-INF", "WEB-INF"];

/// Enumerates and classifies deployable units
#[derive(Debug, Clone, Default)]
pub struct UnitLocator {
    ignore: Option<Regex>,
}

impl UnitLocator {
    /// Locator with an optional ignore pattern; the pattern must match the
    /// whole entry name
    pub fn new(ignore: Option<&str>) -> Result<Self> {
        let ignore = match ignore {
            Some(pattern) => Some(Regex::new(&format!("^(?:{pattern})$"))?),
            None => None,
        };
        Ok(Self { ignore })
    }

    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignore
            .as_ref()
            .map(|pattern| pattern.is_match(name))
            .unwrap_or(false)
    }

    /// Candidate units of `kind` found in `base`, sorted by file name
    pub fn locate(&self, kind: UnitKind, base: &Path) -> Vec<LocatedUnit> {
        match kind {
            UnitKind::Descriptor => self.locate_descriptors(base),
            UnitKind::Archive => self.locate_archives(base),
            UnitKind::Directory => self.locate_directories(base),
        }
    }

    pub fn locate_descriptors(&self, config_base: &Path) -> Vec<LocatedUnit> {
        self.entries(config_base, false)
            .into_iter()
            .filter(|name| has_descriptor_extension(name))
            .map(|name| (config_base.join(&name), name))
            .filter(|(path, _)| path.is_file())
            .map(|(path, name)| {
                LocatedUnit::new(
                    UnitIdentity::from_file_name(&name, true),
                    UnitKind::Descriptor,
                    path,
                )
            })
            .collect()
    }

    pub fn locate_archives(&self, app_base: &Path) -> Vec<LocatedUnit> {
        self.entries(app_base, true)
            .into_iter()
            .filter(|name| has_archive_extension(name))
            .map(|name| (app_base.join(&name), name))
            .filter(|(path, _)| path.is_file())
            .map(|(path, name)| {
                LocatedUnit::new(
                    UnitIdentity::from_file_name(&name, true),
                    UnitKind::Archive,
                    path,
                )
            })
            .collect()
    }

    pub fn locate_directories(&self, app_base: &Path) -> Vec<LocatedUnit> {
        self.entries(app_base, true)
            .into_iter()
            .map(|name| (app_base.join(&name), name))
            .filter(|(path, _)| path.is_dir())
            .map(|(path, name)| {
                LocatedUnit::new(
                    UnitIdentity::from_file_name(&name, false),
                    UnitKind::Directory,
                    path,
                )
            })
            .collect()
    }

    fn entries(&self, base: &Path, apply_ignore: bool) -> Vec<String> {
        let read = match fs::read_dir(base) {
            Ok(read) => read,
            Err(e) => {
                warn!(base = %base.display(), error = %e, "Cannot list base directory");
                return Vec::new();
            }
        };

        let mut names: Vec<String> = read
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| {
                !RESERVED_NAMES
                    .iter()
                    .any(|reserved| name.eq_ignore_ascii_case(reserved))
            })
            .filter(|name| !(apply_ignore && self.is_ignored(name)))
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path();
        fs::write(base.join("shop.war"), b"").unwrap();
        fs::write(base.join("blog##3.WAR"), b"").unwrap();
        fs::write(base.join("notes.txt"), b"").unwrap();
        fs::write(base.join("old.war.bak"), b"").unwrap();
        fs::create_dir(base.join("ROOT")).unwrap();
        fs::create_dir(base.join("META-INF")).unwrap();
        fs::create_dir(base.join("web-inf")).unwrap();
        dir
    }

    #[test]
    fn test_locate_archives() {
        let dir = fixture();
        let units = UnitLocator::default().locate_archives(dir.path());

        let names: Vec<&str> = units.iter().map(|u| u.identity.name()).collect();
        assert_eq!(names, vec!["/blog##3", "/shop"]);
        assert!(units.iter().all(|u| u.kind == UnitKind::Archive));
        assert_eq!(units[1].source, dir.path().join("shop.war"));
    }

    #[test]
    fn test_locate_directories_skips_reserved() {
        let dir = fixture();
        let units = UnitLocator::default().locate(UnitKind::Directory, dir.path());

        assert_eq!(units.len(), 1);
        assert_eq!(units[0].identity.path(), "");
    }

    #[test]
    fn test_ignore_pattern_matches_whole_name() {
        let dir = fixture();
        let locator = UnitLocator::new(Some("shop")).unwrap();
        assert_eq!(locator.locate_archives(dir.path()).len(), 2);

        let locator = UnitLocator::new(Some("shop\\.war")).unwrap();
        let units = locator.locate_archives(dir.path());
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].identity.name(), "/blog##3");
    }

    #[test]
    fn test_descriptors_ignore_pattern_not_applied() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("shop.toml"), b"").unwrap();
        fs::write(dir.path().join("app.toml.default"), b"").unwrap();

        let locator = UnitLocator::new(Some("shop.*")).unwrap();
        let units = locator.locate_descriptors(dir.path());
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].kind, UnitKind::Descriptor);
    }

    #[test]
    fn test_unreadable_base_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let units = UnitLocator::default().locate_archives(&dir.path().join("missing"));
        assert!(units.is_empty());
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(UnitLocator::new(Some("(")).is_err());
    }
}
