//! Transfer Orchestrator
//!
//! Fans one cycle's targets out to the transfer agent. Every target runs in
//! its own task so a failure (or panic) stays confined to that target; the
//! remote paths of a single target are pulled in order and the first
//! failure abandons the rest of that target only.

use futures::stream::{self, StreamExt};
use std::future::Future;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::transfer::{local_destination, TransferAgent, TransferError};
use super::types::{ConcurrencyMode, SyncOutcome, Target};

/// Dispatches per-target transfers with the configured concurrency
pub struct TransferOrchestrator {
    agent: Arc<dyn TransferAgent>,
    mode: ConcurrencyMode,
    parallelism: usize,
}

impl TransferOrchestrator {
    pub fn new(agent: Arc<dyn TransferAgent>, mode: ConcurrencyMode) -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);

        Self {
            agent,
            mode,
            parallelism,
        }
    }

    /// Cap on concurrently running targets in `Thread` mode
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn mode(&self) -> ConcurrencyMode {
        self.mode
    }

    /// Sync every target and wait for all of them.
    ///
    /// Never fails: each target yields exactly one outcome. There is no
    /// cycle deadline; the token only stops targets from starting further
    /// remote paths.
    pub async fn run_cycle(
        &self,
        targets: Vec<Target>,
        local_base_dir: &Path,
        token: &CancellationToken,
    ) -> Vec<SyncOutcome> {
        let base = local_base_dir.to_path_buf();

        match self.mode {
            ConcurrencyMode::Sequential => {
                let mut outcomes = Vec::with_capacity(targets.len());
                for target in targets {
                    outcomes.push(self.spawn_target(target, base.clone(), token.clone()).await);
                }
                outcomes
            }
            ConcurrencyMode::Thread => {
                stream::iter(targets)
                    .map(|target| self.spawn_target(target, base.clone(), token.clone()))
                    .buffer_unordered(self.parallelism)
                    .collect()
                    .await
            }
            ConcurrencyMode::Task => {
                let tasks: Vec<_> = targets
                    .into_iter()
                    .map(|target| self.spawn_target(target, base.clone(), token.clone()))
                    .collect();
                futures::future::join_all(tasks).await
            }
        }
    }

    /// Run one target on its own task; a panic becomes a failed outcome.
    fn spawn_target(
        &self,
        target: Target,
        base: PathBuf,
        token: CancellationToken,
    ) -> impl Future<Output = SyncOutcome> {
        let host = target.host.clone();
        let handle = tokio::spawn(sync_target(self.agent.clone(), target, base, token));

        async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(host = %host, error = %e, "Sync task aborted");
                    SyncOutcome::failed(host, 0, format!("Sync task aborted: {}", e))
                }
            }
        }
    }
}

async fn sync_target(
    agent: Arc<dyn TransferAgent>,
    target: Target,
    base: PathBuf,
    token: CancellationToken,
) -> SyncOutcome {
    let mut synced = 0;

    for remote_path in &target.remote_paths {
        if token.is_cancelled() {
            let e = TransferError::Cancelled {
                remote: remote_path.clone(),
            };
            warn!(host = %target.host, error = %e, "Skipping remaining paths");
            return SyncOutcome::failed(&target.host, synced, e.to_string());
        }

        if let Err(e) = pull_path(agent.as_ref(), &target, remote_path, &base).await {
            error!(
                host = %target.host,
                remote_path = %remote_path,
                error = %e,
                "Failed to copy files"
            );
            return SyncOutcome::failed(&target.host, synced, e.to_string());
        }

        synced += 1;
    }

    info!(
        host = %target.host,
        paths = synced,
        local_dir = %base.join(&target.host).display(),
        "Successfully copied files"
    );
    SyncOutcome::succeeded(&target.host, synced)
}

async fn pull_path(
    agent: &dyn TransferAgent,
    target: &Target,
    remote_path: &str,
    base: &Path,
) -> Result<(), TransferError> {
    let local_path = local_destination(base, &target.host, remote_path);

    tokio::fs::create_dir_all(&local_path)
        .await
        .map_err(|source| TransferError::CreateDir {
            path: local_path.clone(),
            source,
        })?;

    agent.pull(target, remote_path, &local_path).await
}
