//! Fleet Sync Library
//!
//! Discovers a fleet of instances (static list, AWS ASG or Azure VMSS) and
//! pulls files from each of them into a local directory tree on a schedule.

pub mod config;
pub mod logging;
pub mod sync;

pub use config::Settings;
pub use sync::{FleetSyncAgent, Scheduler};
