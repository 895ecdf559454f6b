//! Fleet Sync - Standalone Binary
//!
//! Discovers the instances of a fleet and pulls their files with rsync on a
//! fixed interval until interrupted.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use fleet_sync::config::LoggingSettings;
use fleet_sync::sync::{EnvironmentDetector, RsyncAgent};
use fleet_sync::{logging, FleetSyncAgent, Scheduler, Settings};

/// Fleet Sync - pulls files from every instance of a fleet
#[derive(Parser, Debug)]
#[command(name = "fleet-sync", version, about)]
struct Args {
    /// Settings file
    #[arg(long, default_value = "settings.json", env = "FLEET_SYNC_SETTINGS")]
    settings: PathBuf,

    /// Run a single cycle and exit
    #[arg(long, default_value = "false")]
    once: bool,

    /// Log the transfer commands without running them
    #[arg(long, default_value = "false")]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let settings = match Settings::load(&args.settings) {
        Ok(settings) => Arc::new(settings),
        Err(e) => {
            logging::init(&LoggingSettings::default());
            error!(path = %args.settings.display(), error = %e, "Failed to load settings");
            return ExitCode::FAILURE;
        }
    };

    logging::init(&settings.logging);

    info!(
        settings = %args.settings.display(),
        once = args.once,
        dry_run = args.dry_run,
        "Starting fleet-sync"
    );

    let detector = match EnvironmentDetector::new() {
        Ok(detector) => detector,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Failed to build metadata client");
            return ExitCode::FAILURE;
        }
    };

    let transfer = Arc::new(RsyncAgent::from_settings(&settings).dry_run(args.dry_run));

    let agent = match FleetSyncAgent::start(settings.clone(), &detector, transfer).await {
        Ok(agent) => agent,
        Err(e) => {
            error!(error = %e, "Failed to start");
            return ExitCode::FAILURE;
        }
    };

    let token = CancellationToken::new();

    if args.once {
        let report = agent.sync(&token).await;
        return if report.failed() == 0 {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        };
    }

    tokio::spawn(shutdown_signal(token.clone()));

    let scheduler = Scheduler::new(Duration::from_secs(settings.interval));
    let agent = &agent;
    let cycle_token = token.clone();
    scheduler
        .run(token, move || {
            let token = cycle_token.child_token();
            async move {
                agent.sync(&token).await;
            }
        })
        .await;

    info!("Stopping fleet-sync");
    ExitCode::SUCCESS
}

/// Cancel `token` on Ctrl-C or SIGTERM
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown requested, finishing current cycle");
    token.cancel();
}
