//! Fixed-interval job scheduler
//!
//! The first run is due one interval after the loop starts. After each run
//! the next one is due one interval after that run *completed*, so runs
//! never overlap and a slow cycle pushes the schedule back. The loop wakes
//! once per tick to check whether a run is due.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Stand-in deadline when `interval` cannot be added to the clock (~30 years)
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Lifecycle of the run loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Starting => write!(f, "starting"),
            RunState::Running => write!(f, "running"),
            RunState::Stopping => write!(f, "stopping"),
            RunState::Stopped => write!(f, "stopped"),
        }
    }
}

pub struct Scheduler {
    interval: Duration,
    tick: Duration,
    state: watch::Sender<RunState>,
}

impl Scheduler {
    pub fn new(interval: Duration) -> Self {
        let (state, _) = watch::channel(RunState::Starting);

        Self {
            interval,
            tick: Duration::from_secs(1),
            state,
        }
    }

    /// Override the wake-up granularity (default one second)
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Watch state transitions while the loop runs
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// `from + interval`, saturating far in the future instead of overflowing
    fn due_after(&self, from: Instant) -> Instant {
        from.checked_add(self.interval)
            .unwrap_or_else(|| from + FAR_FUTURE)
    }

    fn transition(&self, next: RunState) {
        self.state.send_replace(next);
        info!(state = %next, "Scheduler state changed");
    }

    /// Run `job` on schedule until `token` is cancelled.
    ///
    /// A run in progress when the token fires is awaited to completion;
    /// the job is expected to watch the token itself to wind down early.
    pub async fn run<F, Fut>(&self, token: CancellationToken, mut job: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        self.transition(RunState::Running);
        info!(interval_secs = self.interval.as_secs(), "Scheduler started");

        let mut next_run = self.due_after(Instant::now());

        while !token.is_cancelled() {
            if Instant::now() >= next_run {
                debug!("Running scheduled job");
                job().await;
                next_run = self.due_after(Instant::now());
                continue;
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = sleep(self.tick) => {}
            }
        }

        self.transition(RunState::Stopping);
        self.transition(RunState::Stopped);
    }
}
