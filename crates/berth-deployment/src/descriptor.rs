//! Descriptor parsing
//!
//! The engine owns a single parser instance and serialises every parse
//! through it.

use crate::error::{DeployError, Result};
use berth_types::AppDescriptor;
use std::fs;
use std::path::Path;

/// Turns descriptor bytes into an [`AppDescriptor`]
pub trait DescriptorParser: Send {
    /// Parse descriptor content; `origin` is only used for error reporting
    fn parse(&mut self, content: &[u8], origin: &Path) -> Result<AppDescriptor>;

    /// Read and parse a descriptor file
    fn parse_file(&mut self, path: &Path) -> Result<AppDescriptor> {
        let content = fs::read(path).map_err(|e| DeployError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        self.parse(&content, path)
    }
}

/// TOML descriptor parser
#[derive(Debug, Default)]
pub struct TomlDescriptorParser;

impl TomlDescriptorParser {
    pub fn new() -> Self {
        Self
    }
}

impl DescriptorParser for TomlDescriptorParser {
    fn parse(&mut self, content: &[u8], origin: &Path) -> Result<AppDescriptor> {
        let parse_error = |reason: String| DeployError::Parse {
            path: origin.to_path_buf(),
            reason,
        };
        let text = std::str::from_utf8(content).map_err(|e| parse_error(e.to_string()))?;
        toml::from_str(text).map_err(|e| parse_error(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_descriptor() {
        let mut parser = TomlDescriptorParser::new();
        let descriptor = parser
            .parse(
                b"doc_base = \"/srv/shop\"\nwatched_resources = [\"conf/app.conf\"]\n",
                Path::new("shop.toml"),
            )
            .unwrap();

        assert_eq!(descriptor.doc_base.as_deref(), Some("/srv/shop"));
        assert_eq!(descriptor.watched_resources, vec!["conf/app.conf"]);
    }

    #[test]
    fn test_unknown_field_is_parse_error() {
        let mut parser = TomlDescriptorParser::new();
        let err = parser
            .parse(b"docbase = \"/srv/shop\"\n", Path::new("shop.toml"))
            .unwrap_err();
        assert!(matches!(err, DeployError::Parse { .. }));
        assert!(err.yields_placeholder());
    }

    #[test]
    fn test_missing_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = TomlDescriptorParser::new()
            .parse_file(&dir.path().join("gone.toml"))
            .unwrap_err();
        assert!(matches!(err, DeployError::Parse { .. }));
    }
}
