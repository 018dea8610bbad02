//! Scheduler and reconciliation loop
//!
//! The scheduler is responsible for:
//! - Running the startup deployment pass
//! - Periodically checking deployed units and discovering new ones
//! - Running a pass on demand

mod reconciler;

pub use reconciler::Scheduler;
