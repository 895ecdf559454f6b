//! Fleet Sync Agent
//!
//! Binds the fleet source chosen at startup to the transfer orchestrator
//! and runs one discovery + transfer cycle per call.

use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use super::detector::EnvironmentDetector;
use super::orchestrator::TransferOrchestrator;
use super::providers::Fleet;
use super::transfer::TransferAgent;
use super::types::{CloudEnvironment, CycleReport, StartupError};
use crate::config::Settings;

pub struct FleetSyncAgent {
    settings: Arc<Settings>,
    fleet: Fleet,
    orchestrator: TransferOrchestrator,
}

impl FleetSyncAgent {
    pub fn new(settings: Arc<Settings>, fleet: Fleet, transfer: Arc<dyn TransferAgent>) -> Self {
        let orchestrator = TransferOrchestrator::new(transfer, settings.concurrency);

        Self {
            settings,
            fleet,
            orchestrator,
        }
    }

    /// Detect the environment once and bind the matching fleet source.
    ///
    /// Fails when nothing was detected and no static hosts are configured.
    pub async fn start(
        settings: Arc<Settings>,
        detector: &EnvironmentDetector,
        transfer: Arc<dyn TransferAgent>,
    ) -> Result<Self, StartupError> {
        let environment = detector.detect(&settings).await;
        let fleet = Fleet::for_environment(environment, settings.clone())?;

        info!(
            environment = %fleet.environment(),
            concurrency = %settings.concurrency,
            interval_secs = settings.interval,
            base_local_dir = %settings.base_local_dir.display(),
            "Fleet source selected"
        );

        Ok(Self::new(settings, fleet, transfer))
    }

    pub fn environment(&self) -> CloudEnvironment {
        self.fleet.environment()
    }

    /// Run one cycle: enumerate, then pull from every target.
    pub async fn sync(&self, token: &CancellationToken) -> CycleReport {
        let cycle_id = Uuid::new_v4();
        let span = info_span!("sync_cycle", cycle_id = %cycle_id);

        async move {
            let targets = self.fleet.enumerate().await;
            let target_count = targets.len();

            let outcomes = if targets.is_empty() {
                warn!(environment = %self.environment(), "No instances found");
                Vec::new()
            } else {
                info!(targets = target_count, mode = %self.orchestrator.mode(), "Starting transfers");
                self.orchestrator
                    .run_cycle(targets, &self.settings.base_local_dir, token)
                    .await
            };

            let report = CycleReport {
                cycle_id,
                environment: self.environment(),
                targets: target_count,
                outcomes,
                timestamp: Utc::now(),
            };

            info!(
                targets = report.targets,
                succeeded = report.succeeded(),
                failed = report.failed(),
                "Sync cycle complete"
            );

            report
        }
        .instrument(span)
        .await
    }
}
