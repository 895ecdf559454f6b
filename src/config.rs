//! Settings Model
//!
//! Validated, immutable configuration loaded once at startup and shared
//! (behind an `Arc`) with every component. Nothing reads configuration
//! from ambient state after this point.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

use crate::sync::ConcurrencyMode;

/// Errors raised while loading settings. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Settings file could not be read
    #[error("Failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Settings file is not valid JSON or a required key is missing
    #[error("Failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is present but unusable
    #[error("Invalid settings: {0}")]
    Invalid(String),
}

/// Fleet sync settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// AWS region for the Auto Scaling and EC2 APIs
    pub aws_region: String,
    /// Auto Scaling Group to enumerate
    pub asg_name: String,
    /// Azure subscription holding the scale set
    pub subscription_id: String,
    /// Azure resource group holding the scale set
    pub resource_group: String,
    /// Azure Virtual Machine Scale Set to enumerate
    pub vmss_name: String,
    /// Private key used for SSH on every target
    pub ssh_key_path: PathBuf,
    /// SSH login on every target
    pub ssh_username: String,
    /// Remote directories to pull, in order
    pub remote_paths: Vec<String>,
    /// Seconds between sync cycles
    #[serde(default = "default_interval")]
    pub interval: u64,
    /// Root of the local mirror tree
    #[serde(default = "default_base_local_dir")]
    pub base_local_dir: PathBuf,
    /// Privilege elevation binary on the remote hosts
    #[serde(default = "default_sudo_path")]
    pub sudo_path: String,
    /// Network interface whose private IP is used to reach an instance
    #[serde(default = "default_device_index")]
    pub device_index: usize,
    /// Static host list; takes precedence over cloud discovery when non-empty
    #[serde(default)]
    pub cc_vms: Option<Vec<String>>,
    /// How targets of one cycle are fanned out
    #[serde(default)]
    pub concurrency: ConcurrencyMode,
    /// Transfer agent executable
    #[serde(default = "default_transfer_command")]
    pub transfer_command: String,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default filter directive (e.g. "info", "fleet_sync=debug")
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Longest accepted sync interval (30 days)
pub const MAX_INTERVAL_SECS: u64 = 30 * 24 * 60 * 60;

fn default_interval() -> u64 {
    60
}

fn default_base_local_dir() -> PathBuf {
    PathBuf::from("./")
}

fn default_sudo_path() -> String {
    "/usr/local/bin/sudo".to_string()
}

fn default_device_index() -> usize {
    1
}

fn default_transfer_command() -> String {
    "rsync".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    /// Load and validate settings from a JSON file
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_json(&raw)
    }

    /// Parse and validate settings from a JSON document
    pub fn from_json(raw: &str) -> Result<Self, SettingsError> {
        let settings: Settings = serde_json::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Static host list, if one is configured. An empty list counts as absent.
    pub fn static_hosts(&self) -> Option<&[String]> {
        self.cc_vms
            .as_deref()
            .filter(|hosts| !hosts.is_empty())
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.interval == 0 {
            return Err(SettingsError::Invalid(
                "interval must be at least 1 second".to_string(),
            ));
        }

        if self.interval > MAX_INTERVAL_SECS {
            return Err(SettingsError::Invalid(format!(
                "interval must be at most {} seconds",
                MAX_INTERVAL_SECS
            )));
        }

        if self.ssh_username.trim().is_empty() {
            return Err(SettingsError::Invalid(
                "ssh_username must not be empty".to_string(),
            ));
        }

        if self.remote_paths.is_empty() {
            return Err(SettingsError::Invalid(
                "remote_paths must list at least one path".to_string(),
            ));
        }

        // Each target owns local_base_dir/<host>; a parent component would escape it.
        if let Some(path) = self
            .remote_paths
            .iter()
            .find(|p| Path::new(p).components().any(|c| c == Component::ParentDir))
        {
            return Err(SettingsError::Invalid(format!(
                "remote path {} must not contain '..'",
                path
            )));
        }

        if let Some(hosts) = &self.cc_vms {
            if hosts.iter().any(|h| h.trim().is_empty()) {
                return Err(SettingsError::Invalid(
                    "cc_vms must not contain empty hosts".to_string(),
                ));
            }
        }

        Ok(())
    }
}
