//! Fleet Sync Types
//!
//! Core types shared by discovery, orchestration and scheduling.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

use crate::config::Settings;

/// Where this process runs, as far as target discovery is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudEnvironment {
    Aws,
    Azure,
    Static,
    Unknown,
}

impl std::fmt::Display for CloudEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloudEnvironment::Aws => write!(f, "aws"),
            CloudEnvironment::Azure => write!(f, "azure"),
            CloudEnvironment::Static => write!(f, "static"),
            CloudEnvironment::Unknown => write!(f, "unknown"),
        }
    }
}

/// How the targets of one cycle are dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrencyMode {
    /// Parallel, bounded by the host's available parallelism
    #[default]
    Thread,
    /// One lightweight task per target, no bound
    Task,
    /// One target at a time
    Sequential,
}

impl std::fmt::Display for ConcurrencyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConcurrencyMode::Thread => write!(f, "thread"),
            ConcurrencyMode::Task => write!(f, "task"),
            ConcurrencyMode::Sequential => write!(f, "sequential"),
        }
    }
}

/// One discovered instance to pull files from.
///
/// Built fresh on every cycle and dropped once the cycle completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// IP address or hostname
    pub host: String,
    /// SSH login
    pub username: String,
    /// SSH private key
    pub key_path: PathBuf,
    /// Remote directories to pull, in order
    pub remote_paths: Vec<String>,
}

impl Target {
    /// Create a target for `host` carrying the shared SSH and path settings
    pub fn from_settings(host: impl Into<String>, settings: &Settings) -> Self {
        Self {
            host: host.into(),
            username: settings.ssh_username.clone(),
            key_path: settings.ssh_key_path.clone(),
            remote_paths: settings.remote_paths.clone(),
        }
    }
}

/// Result of syncing one target during one cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOutcome {
    /// Target host
    pub host: String,
    /// Whether every remote path was pulled
    pub success: bool,
    /// Number of remote paths pulled before completion or failure
    pub paths_synced: usize,
    /// Failure detail
    pub error: Option<String>,
}

impl SyncOutcome {
    pub fn succeeded(host: impl Into<String>, paths_synced: usize) -> Self {
        Self {
            host: host.into(),
            success: true,
            paths_synced,
            error: None,
        }
    }

    pub fn failed(host: impl Into<String>, paths_synced: usize, error: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            success: false,
            paths_synced,
            error: Some(error.into()),
        }
    }
}

/// Summary of one discovery + transfer cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub environment: CloudEnvironment,
    /// Number of targets discovered
    pub targets: usize,
    pub outcomes: Vec<SyncOutcome>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl CycleReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.success).count()
    }

    /// Outcome for a host, if it was part of the cycle
    pub fn outcome(&self, host: &str) -> Option<&SyncOutcome> {
        self.outcomes.iter().find(|o| o.host == host)
    }
}

/// Errors that stop the process before the run loop starts
#[derive(Debug, Error)]
pub enum StartupError {
    /// No metadata endpoint answered and no static targets are configured
    #[error("Failed to detect cloud environment and no static targets are configured")]
    UndetectedEnvironment,

    /// Provider client could not be constructed
    #[error(transparent)]
    Provider(#[from] anyhow::Error),
}
