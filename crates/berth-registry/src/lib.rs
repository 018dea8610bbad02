//! Berth Registry - Deployment bookkeeping and the container seam
//!
//! This crate provides the shared state the deployment engine works against:
//!
//! - **DeployedApplicationRegistry**: tracked redeploy/reload resources per deployed unit
//! - **ServicedSet**: units currently claimed by an administrative or deployment operation
//! - **Host**: the container tree that starts and stops application instances
//!
//! ## In-Memory Container
//!
//! [`InMemoryHost`] is suitable for embedding and testing. Any container
//! able to add, find and remove named children can implement [`Host`].

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod host;
pub mod memory;
pub mod registry;
pub mod serviced;

// Re-exports
pub use error::{RegistryError, Result};
pub use host::{AppInstance, AppKind, Host, LifecycleListener, LifecycleState};
pub use memory::InMemoryHost;
pub use registry::DeployedApplicationRegistry;
pub use serviced::ServicedSet;
