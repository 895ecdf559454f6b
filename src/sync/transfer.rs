//! Transfer Agent
//!
//! The external tool that actually copies files. One invocation pulls one
//! remote directory of one target into its local mirror directory.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::info;

use super::types::Target;
use crate::config::Settings;

/// Errors that fail a single target
#[derive(Debug, Error)]
pub enum TransferError {
    /// Local mirror directory could not be created
    #[error("Failed to create local directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Transfer agent could not be started
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Transfer agent ran and reported failure
    #[error("{program} exited with {status} pulling {remote}: {stderr}")]
    Exit {
        program: String,
        status: std::process::ExitStatus,
        remote: String,
        stderr: String,
    },

    /// Shutdown requested before this path was started
    #[error("Shutdown requested before pulling {remote}")]
    Cancelled { remote: String },
}

/// Trait for file transfer tools
#[async_trait]
pub trait TransferAgent: Send + Sync {
    /// Pull `remote_path` from `target` into `local_path` (which exists)
    async fn pull(
        &self,
        target: &Target,
        remote_path: &str,
        local_path: &Path,
    ) -> Result<(), TransferError>;
}

/// Local mirror directory for one remote path of one host.
///
/// `base / host / remote_path`, with leading separators stripped from the
/// remote path so it nests under the host directory.
pub fn local_destination(base: &Path, host: &str, remote_path: &str) -> PathBuf {
    base.join(host)
        .join(remote_path.trim_start_matches(&['/', '\\'][..]))
}

/// rsync over SSH with privilege elevation on the remote side
#[derive(Debug, Clone)]
pub struct RsyncAgent {
    program: String,
    sudo_path: String,
    dry_run: bool,
}

impl RsyncAgent {
    pub fn new(program: impl Into<String>, sudo_path: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            sudo_path: sudo_path.into(),
            dry_run: false,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.transfer_command, &settings.sudo_path)
    }

    /// Log commands instead of running them
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Arguments for one pull: archive, compressed, no host key checks,
    /// `user@host:remote/` into `local/`
    pub fn command_args(&self, target: &Target, remote_path: &str, local_path: &Path) -> Vec<String> {
        vec![
            "-az".to_string(),
            "-e".to_string(),
            format!(
                "ssh -o StrictHostKeyChecking=no -i {}",
                target.key_path.display()
            ),
            format!("--rsync-path={} rsync", self.sudo_path),
            format!(
                "{}@{}:{}/",
                target.username,
                target.host,
                remote_path.trim_end_matches('/')
            ),
            format!("{}/", local_path.display().to_string().trim_end_matches('/')),
        ]
    }

    fn command_line(&self, args: &[String]) -> String {
        std::iter::once(self.program.as_str())
            .chain(args.iter().map(|a| a.as_str()))
            .map(|part| {
                if part.contains(' ') {
                    format!("'{}'", part)
                } else {
                    part.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl TransferAgent for RsyncAgent {
    async fn pull(
        &self,
        target: &Target,
        remote_path: &str,
        local_path: &Path,
    ) -> Result<(), TransferError> {
        let args = self.command_args(target, remote_path, local_path);
        let command_line = self.command_line(&args);

        if self.dry_run {
            info!(host = %target.host, command = %command_line, "DRY RUN - would run command");
            return Ok(());
        }

        info!(host = %target.host, command = %command_line, "Running command");

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| TransferError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(TransferError::Exit {
                program: self.program.clone(),
                status: output.status,
                remote: format!("{}:{}", target.host, remote_path),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}
