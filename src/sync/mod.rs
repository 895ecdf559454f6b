//! Fleet Sync Core
//!
//! Periodically discovers the instances of a fleet and pulls files from
//! each of them to a local mirror tree.
//!
//! ## Architecture
//!
//! - **Detector**: classifies the host (AWS, Azure) via instance metadata
//! - **Providers**: static list, AWS Auto Scaling Group, Azure VM Scale Set
//! - **Orchestrator**: fans transfers out per target with failure isolation
//! - **Scheduler**: fixed-interval tick loop with cooperative shutdown
//!
//! Control flow per cycle: scheduler -> agent -> provider -> orchestrator
//! -> transfer agent (one invocation per target and remote path).

mod agent;
mod detector;
mod orchestrator;
pub mod providers;
mod scheduler;
pub mod sigv4;
pub mod transfer;
mod types;

pub use agent::FleetSyncAgent;
pub use detector::{EnvironmentDetector, METADATA_BASE_URL};
pub use orchestrator::TransferOrchestrator;
pub use providers::Fleet;
pub use scheduler::{RunState, Scheduler};
pub use transfer::{local_destination, RsyncAgent, TransferAgent, TransferError};
pub use types::{CloudEnvironment, ConcurrencyMode, CycleReport, StartupError, SyncOutcome, Target};
