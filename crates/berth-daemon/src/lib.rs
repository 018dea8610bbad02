//! Berth Daemon library
//!
//! This module provides the core components for the berth daemon:
//! - Layered configuration
//! - Scheduler and periodic reconciliation
//! - Process lifecycle management

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod scheduler;
pub mod server;

pub use config::{DaemonConfig, LoggingConfig, SchedulerConfig};
pub use error::{DaemonError, DaemonResult};
pub use scheduler::Scheduler;
pub use server::Server;
