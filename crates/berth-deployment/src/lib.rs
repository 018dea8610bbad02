//! Berth Deployment Engine
//!
//! Discovers deployable units on disk, deploys them into a [`Host`], watches
//! their resources and redeploys, reloads or undeploys them as files change.
//!
//! ## Units
//!
//! A unit is packaged one of three ways, in order of precedence:
//!
//! - a descriptor `<name>.toml` in the configuration base
//! - an archive `<name>.war` in the application base
//! - an exploded directory `<name>/` in the application base
//!
//! ## Architectural Boundaries
//!
//! - `berth-registry` owns: the container tree, tracked applications, the
//!   serviced set
//! - `berth-deployment` owns: discovery, deployment procedures, staleness
//!   checks, cleanup, reconciliation passes
//! - `berth-daemon` owns: the periodic schedule and process lifecycle
//!
//! ## Usage
//!
//! ```no_run
//! use berth_deployment::{DeploymentEngine, HostConfig, Reconciler};
//! use berth_registry::InMemoryHost;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HostConfig::new("/srv/berth/apps", "/srv/berth/conf/localhost");
//! let host = Arc::new(InMemoryHost::new("localhost"));
//! let engine = Arc::new(DeploymentEngine::new(config, host)?);
//!
//! let reconciler = Reconciler::new(engine);
//! reconciler.start().await;
//! let report = reconciler.tick().await;
//! println!("deployed {:?}", report.deployed);
//! # Ok(())
//! # }
//! ```
//!
//! [`Host`]: berth_registry::Host

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod archive;
pub mod cleanup;
pub mod config;
pub mod deployer;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod fsutil;
pub mod listener;
pub mod locator;
pub mod pool;
pub mod reconciler;
pub mod watcher;

// Re-exports
pub use archive::{ArchiveReader, TarArchiveReader, EXPANSION_TRACKER};
pub use cleanup::ResourceCleaner;
pub use config::{HostConfig, FILE_MODIFICATION_RESOLUTION_MS};
pub use deployer::DeployOutcome;
pub use descriptor::{DescriptorParser, TomlDescriptorParser};
pub use engine::DeploymentEngine;
pub use error::{DeployError, Result};
pub use listener::{DefaultConfigurer, ListenerConstructor, ListenerFactory, DEFAULT_LISTENER};
pub use locator::{UnitLocator, RESERVED_NAMES};
pub use pool::DeployPool;
pub use reconciler::{ReconcileReport, Reconciler};
pub use watcher::{ResourceWatcher, UndeployCause, Verdict};
