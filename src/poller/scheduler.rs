//! # Telemetry Poller
//!
//! Periodically fetches the engine's connection list and replaces the
//! registry snapshot.
//!
//! ## Cadence
//! - **Engine not running**: no fetch, check again after `interval`
//! - **Fetch succeeded**: ingest, reset the failure counter, next poll after `interval`
//! - **Fetch failed**: count it, next poll after `retry_delay`
//! - **Threshold reached**: stop the engine, wait `restart_cooldown`, start it
//!   again, reset the counter

use super::payload::Diagnostics;
use super::source::TelemetrySource;
use crate::config::PollerConfig;
use crate::error::MonitorError;
use crate::registry::ConnectionRegistry;
use crate::supervisor::{CaptureProcessState, EngineControl};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Poller bookkeeping exposed to status lines.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollerStatus {
    pub consecutive_failures: u32,
    pub last_update: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub diagnostics: Option<Diagnostics>,
    /// Engine restarts forced by sustained failures
    pub restarts: u32,
    pub polls: u64,
}

/// Result of a single poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Engine was not running; nothing fetched
    Skipped(CaptureProcessState),
    /// Snapshot replaced with this many records
    Updated(usize),
    Failed { failures: u32 },
    /// Failure threshold reached and the engine was restarted
    Restarted,
}

impl PollOutcome {
    pub fn next_delay(&self, config: &PollerConfig) -> Duration {
        match self {
            PollOutcome::Failed { .. } => config.retry_delay,
            _ => config.interval,
        }
    }
}

pub struct TelemetryPoller<S, C> {
    source: S,
    control: C,
    registry: Arc<ConnectionRegistry>,
    config: PollerConfig,
    status: Arc<RwLock<PollerStatus>>,
}

impl<S, C> TelemetryPoller<S, C>
where
    S: TelemetrySource,
    C: EngineControl,
{
    pub fn new(
        source: S,
        control: C,
        registry: Arc<ConnectionRegistry>,
        config: PollerConfig,
    ) -> Self {
        Self {
            source,
            control,
            registry,
            config,
            status: Arc::new(RwLock::new(PollerStatus::default())),
        }
    }

    pub fn status(&self) -> PollerStatus {
        self.status.read().clone()
    }

    /// Shared handle to the status, readable after the poller moved into its task.
    pub fn status_handle(&self) -> Arc<RwLock<PollerStatus>> {
        self.status.clone()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.status.read().consecutive_failures
    }

    /// Runs one poll cycle.
    pub async fn poll_once(&self) -> PollOutcome {
        let state = self.control.state();
        if state != CaptureProcessState::Running {
            debug!("Capture engine {}, skipping poll", state);
            return PollOutcome::Skipped(state);
        }

        self.status.write().polls += 1;

        match self.source.fetch().await {
            Ok(payload) => {
                let count = payload.connections.len();
                if let Err(e) = self.registry.reload_persisted() {
                    warn!("Failed to reload favorites and clear marker: {}", e);
                }
                self.registry.ingest(payload.connections);

                let mut status = self.status.write();
                status.consecutive_failures = 0;
                status.last_update = Some(Utc::now());
                status.last_error = None;
                if payload.diagnostics.is_some() {
                    status.diagnostics = payload.diagnostics;
                }
                PollOutcome::Updated(count)
            }
            Err(e) => {
                let failures = {
                    let mut status = self.status.write();
                    status.consecutive_failures += 1;
                    status.last_error = Some(e.to_string());
                    status.consecutive_failures
                };

                if failures >= self.config.failure_threshold {
                    self.restart_engine(failures).await;
                    return PollOutcome::Restarted;
                }

                let threshold = self.config.failure_threshold;
                if e.is_transient() {
                    debug!("Telemetry poll failed ({}/{}): {}", failures, threshold, e);
                } else {
                    warn!("Telemetry poll failed ({}/{}): {}", failures, threshold, e);
                }
                PollOutcome::Failed { failures }
            }
        }
    }

    async fn restart_engine(&self, failures: u32) {
        warn!("{}", MonitorError::SustainedFailure { failures });

        {
            let mut status = self.status.write();
            status.consecutive_failures = 0;
            status.restarts += 1;
        }

        if let Err(e) = self.control.stop().await {
            warn!("Failed to stop capture engine: {}", e);
        }
        sleep(self.config.restart_cooldown).await;
        if let Err(e) = self.control.start().await {
            error!("Failed to restart capture engine: {}", e);
        }
    }

    /// Polls until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Telemetry poller started (interval {:?}, retry {:?}, threshold {})",
            self.config.interval, self.config.retry_delay, self.config.failure_threshold
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let outcome = tokio::select! {
                outcome = self.poll_once() => outcome,
                _ = shutdown.changed() => break,
            };
            let delay = outcome.next_delay(&self.config);

            tokio::select! {
                _ = sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Telemetry poller stopped");
    }
}

impl<S, C> TelemetryPoller<S, C>
where
    S: TelemetrySource + 'static,
    C: EngineControl + 'static,
{
    /// Spawns [`run`](Self::run) on the current runtime.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
