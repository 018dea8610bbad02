//! Berth Types - Core types for the deployment engine
//!
//! Berth discovers deployable application units in a host's base
//! directories, deploys them into a running container, and keeps them in
//! step with the file system: changed archives are redeployed, changed
//! watched files trigger reloads, removed units are undeployed.
//!
//! ## Key Concepts
//!
//! - **UnitIdentity**: logical path plus optional version, decoded from file names
//! - **LocatedUnit**: a unit found on disk with its packaging kind
//! - **TrackedApplication**: redeploy/reload resources watched for a deployed unit
//! - **AppDescriptor**: the configuration object parsed from a descriptor
//! - **Events**: unified deployment lifecycle stream

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod descriptor;
pub mod events;
pub mod identity;
pub mod tracked;
pub mod unit;

// Re-export main types
pub use descriptor::{AppDescriptor, EMBEDDED_DESCRIPTOR, HOST_DEFAULTS_FILE};
pub use events::{DeployEvent, DeployEventEnvelope, EventSeverity, UndeployReason};
pub use identity::{
    has_archive_extension, has_descriptor_extension, UnitIdentity, ARCHIVE_EXTENSION,
    DESCRIPTOR_EXTENSION, ROOT_NAME, VERSION_MARKER,
};
pub use tracked::{TrackedApplication, WatchedResources, SENTINEL_MTIME};
pub use unit::{LocatedUnit, UnitKind};
