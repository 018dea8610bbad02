//! Unit identity and the name codec
//!
//! A deployable unit is identified by its logical mount path and an optional
//! version. The same identity can be spelled three ways on disk:
//!
//! - `shop.toml` descriptor in the configuration base
//! - `shop.war` archive in the application base
//! - `shop/` exploded directory in the application base
//!
//! Nested paths use `#` in file names (`/shop/admin` ↔ `shop#admin`), the
//! root path uses the reserved `ROOT` name and versions follow a `##` marker
//! (`/shop` version `2` ↔ `shop##2`).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Separates the base name from the version in file names
pub const VERSION_MARKER: &str = "##";

/// File-system name of the root path
pub const ROOT_NAME: &str = "ROOT";

/// Extension of packaged archives
pub const ARCHIVE_EXTENSION: &str = "war";

/// Extension of descriptor files
pub const DESCRIPTOR_EXTENSION: &str = "toml";

/// Immutable identity of a deployable unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitIdentity {
    path: String,
    version: String,
    base_name: String,
    name: String,
}

impl UnitIdentity {
    /// Decode an identity from a file name or a unit name.
    ///
    /// With `strip_extension` set, a trailing `.war` or `.toml` (any case) is
    /// removed before decoding. A leading `/` is accepted so unit names such
    /// as `/shop##2` decode to the same identity as `shop##2.war`.
    pub fn from_file_name(name: &str, strip_extension: bool) -> Self {
        let trimmed = name.strip_prefix('/').unwrap_or(name);
        let mut base = trimmed.replace('/', "#");

        if base.is_empty() || base.starts_with(VERSION_MARKER) {
            base = format!("{ROOT_NAME}{base}");
        }

        if strip_extension {
            if let Some(stem) = strip_known_extension(&base) {
                base = stem.to_string();
            }
        }

        let (stem, version) = match base.find(VERSION_MARKER) {
            Some(idx) => (
                &base[..idx],
                base[idx + VERSION_MARKER.len()..].to_string(),
            ),
            None => (base.as_str(), String::new()),
        };

        let path = if stem == ROOT_NAME {
            String::new()
        } else {
            format!("/{}", stem.replace('#', "/"))
        };

        let name = join_name(&path, &version);

        Self {
            path,
            version,
            name,
            base_name: base,
        }
    }

    /// Build an identity from a logical path and version.
    ///
    /// `""`, `"/"` and `"/ROOT"` all denote the root path.
    pub fn from_path_version(path: &str, version: &str) -> Self {
        let path = if path.is_empty() || path == "/" || path == "/ROOT" {
            String::new()
        } else if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        let version = version.to_string();

        let mut base_name = if path.is_empty() {
            ROOT_NAME.to_string()
        } else {
            path[1..].replace('/', "#")
        };
        if !version.is_empty() {
            base_name.push_str(VERSION_MARKER);
            base_name.push_str(&version);
        }

        let name = join_name(&path, &version);

        Self {
            path,
            version,
            base_name,
            name,
        }
    }

    /// Logical mount path, `""` for the root
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Version suffix, empty when unversioned
    pub fn version(&self) -> &str {
        &self.version
    }

    /// File-system safe name shared by all packagings of this unit
    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    /// Registry key: `path` or `path##version`
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_versioned(&self) -> bool {
        !self.version.is_empty()
    }

    /// Path as shown to humans, `/` for the root
    pub fn display_name(&self) -> String {
        let mut display = if self.path.is_empty() {
            "/".to_string()
        } else {
            self.path.clone()
        };
        if !self.version.is_empty() {
            display.push_str(VERSION_MARKER);
            display.push_str(&self.version);
        }
        display
    }

    /// Canonical file stem; same for descriptor, archive and directory
    pub fn canonical_file_stem(&self) -> &str {
        &self.base_name
    }

    /// Canonical descriptor file name (`<base>.toml`)
    pub fn descriptor_file_name(&self) -> String {
        format!("{}.{}", self.base_name, DESCRIPTOR_EXTENSION)
    }

    /// Canonical archive file name (`<base>.war`)
    pub fn archive_file_name(&self) -> String {
        format!("{}.{}", self.base_name, ARCHIVE_EXTENSION)
    }

    /// Whether re-encoding the decoded path and version yields the same base
    /// name. A name with an empty version (`shop##.war`) is not canonical: it
    /// decodes to the same unit as `shop.war`.
    pub fn is_canonical(&self) -> bool {
        Self::from_path_version(&self.path, &self.version).base_name == self.base_name
    }

    /// Whether two identities are versions of the same logical application
    pub fn is_parallel_version_of(&self, other: &UnitIdentity) -> bool {
        self.path == other.path && self.version != other.version
    }
}

impl fmt::Display for UnitIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

/// Whether a file name carries the archive extension (any case)
pub fn has_archive_extension(name: &str) -> bool {
    has_extension(name, ARCHIVE_EXTENSION)
}

/// Whether a file name carries the descriptor extension (any case)
pub fn has_descriptor_extension(name: &str) -> bool {
    has_extension(name, DESCRIPTOR_EXTENSION)
}

fn has_extension(name: &str, extension: &str) -> bool {
    let suffix_len = extension.len() + 1;
    name.len() > suffix_len
        && name.is_char_boundary(name.len() - suffix_len)
        && name[name.len() - suffix_len..].eq_ignore_ascii_case(&format!(".{extension}"))
}

fn strip_known_extension(name: &str) -> Option<&str> {
    [ARCHIVE_EXTENSION, DESCRIPTOR_EXTENSION]
        .iter()
        .find(|ext| has_extension(name, ext))
        .map(|ext| &name[..name.len() - ext.len() - 1])
}

fn join_name(path: &str, version: &str) -> String {
    if version.is_empty() {
        path.to_string()
    } else {
        format!("{path}{VERSION_MARKER}{version}")
    }
}
