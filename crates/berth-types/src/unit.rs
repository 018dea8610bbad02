//! Located deployable units

use crate::UnitIdentity;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Packaging of a deployable unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitKind {
    /// Standalone descriptor file in the configuration base
    Descriptor,
    /// Packaged archive in the application base
    Archive,
    /// Exploded directory tree in the application base
    Directory,
}

impl UnitKind {
    /// Discovery precedence: descriptors, then archives, then directories
    pub const DISCOVERY_ORDER: [UnitKind; 3] =
        [UnitKind::Descriptor, UnitKind::Archive, UnitKind::Directory];
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitKind::Descriptor => write!(f, "descriptor"),
            UnitKind::Archive => write!(f, "archive"),
            UnitKind::Directory => write!(f, "directory"),
        }
    }
}

/// A unit found on disk together with its classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatedUnit {
    pub identity: UnitIdentity,
    pub kind: UnitKind,
    /// Absolute path of the descriptor file, archive or directory
    pub source: PathBuf,
}

impl LocatedUnit {
    pub fn new(identity: UnitIdentity, kind: UnitKind, source: PathBuf) -> Self {
        Self {
            identity,
            kind,
            source,
        }
    }
}
