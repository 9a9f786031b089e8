//! # Capture Supervisor
//!
//! Owns the capture engine process. Every transition goes through a single
//! actor task fed by an unbounded channel, so state changes are serialized.
//!
//! ## Events
//! - **Start / Stop**: caller requests, answered over a oneshot
//! - **Ready**: the readiness probe saw the engine port (or gave up)
//! - **Exited**: the exit watcher reaped the process
//! - **RestartDue**: a delayed restart after an abnormal exit
//!
//! Each spawn and each stop bumps an epoch. Probe, exit and restart events
//! carry the epoch they were created under and are dropped when it no longer
//! matches, which keeps a late exit or a pending restart from touching a newer
//! process.

use super::engine::{self, ExitOutcome};
use super::state::{CaptureProcessState, SupervisorStatus};
use crate::config::EngineConfig;
use crate::error::{MonitorError, Result};
use chrono::Utc;
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

enum Event {
    Start(oneshot::Sender<Result<()>>),
    Stop(oneshot::Sender<()>),
    Ready { epoch: u64, listening: bool },
    Exited { epoch: u64, outcome: ExitOutcome },
    RestartDue { epoch: u64 },
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable handle to the supervisor actor.
#[derive(Clone)]
pub struct CaptureSupervisor {
    events: mpsc::UnboundedSender<Event>,
    state: watch::Receiver<CaptureProcessState>,
    status: Arc<RwLock<SupervisorStatus>>,
}

impl CaptureSupervisor {
    /// Starts the actor task. The engine itself is not launched until
    /// [`start`](Self::start) is called. Must be called inside a tokio runtime.
    pub fn spawn(config: EngineConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(CaptureProcessState::Stopped);
        let status = Arc::new(RwLock::new(SupervisorStatus::default()));

        let actor = SupervisorActor {
            config,
            events: events_tx.downgrade(),
            state: state_tx,
            status: status.clone(),
            epoch: 0,
            engine: None,
        };
        tokio::spawn(actor.run(events_rx));

        Self {
            events: events_tx,
            state: state_rx,
            status,
        }
    }

    /// Launches the engine unless it is already starting or running.
    pub async fn start(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Event::Start(reply))?;
        rx.await.map_err(|_| MonitorError::SupervisorGone)?
    }

    /// Terminates the engine and cancels any pending automatic restart.
    pub async fn stop(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Event::Stop(reply))?;
        rx.await.map_err(|_| MonitorError::SupervisorGone)
    }

    /// Stops the engine and ends the actor task.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Event::Shutdown(reply))?;
        rx.await.map_err(|_| MonitorError::SupervisorGone)
    }

    pub fn state(&self) -> CaptureProcessState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<CaptureProcessState> {
        self.state.clone()
    }

    pub fn status(&self) -> SupervisorStatus {
        self.status.read().clone()
    }

    fn send(&self, event: Event) -> Result<()> {
        self.events
            .send(event)
            .map_err(|_| MonitorError::SupervisorGone)
    }
}

impl std::fmt::Debug for CaptureSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSupervisor")
            .field("state", &self.state())
            .finish()
    }
}

// ================================================================================================
// ACTOR
// ================================================================================================

struct RunningEngine {
    kill: Option<oneshot::Sender<()>>,
    watcher: JoinHandle<()>,
    probe: JoinHandle<()>,
}

struct SupervisorActor {
    config: EngineConfig,
    events: mpsc::WeakUnboundedSender<Event>,
    state: watch::Sender<CaptureProcessState>,
    status: Arc<RwLock<SupervisorStatus>>,
    epoch: u64,
    engine: Option<RunningEngine>,
}

impl SupervisorActor {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<Event>) {
        while let Some(event) = events.recv().await {
            match event {
                Event::Start(reply) => {
                    let _ = reply.send(self.start_engine());
                }
                Event::Stop(reply) => {
                    self.stop_engine().await;
                    let _ = reply.send(());
                }
                Event::Ready { epoch, listening } => self.on_ready(epoch, listening),
                Event::Exited { epoch, outcome } => self.on_exit(epoch, outcome),
                Event::RestartDue { epoch } => self.on_restart_due(epoch),
                Event::Shutdown(reply) => {
                    self.stop_engine().await;
                    let _ = reply.send(());
                    info!("Capture supervisor shut down");
                    return;
                }
            }
        }

        // Every handle dropped without an explicit shutdown
        self.stop_engine().await;
    }

    fn current(&self) -> CaptureProcessState {
        *self.state.borrow()
    }

    fn set_state(&self, next: CaptureProcessState) {
        let prev = self.current();
        if prev != next {
            debug!("Capture engine {} -> {}", prev, next);
        }
        self.state.send_replace(next);
        self.status.write().state = next;
    }

    fn start_engine(&mut self) -> Result<()> {
        let state = self.current();
        if state.is_alive() {
            debug!("Capture engine already {}, ignoring start", state);
            return Ok(());
        }

        self.epoch += 1;
        let epoch = self.epoch;

        let mut child = match engine::spawn(&self.config) {
            Ok(child) => child,
            Err(e) => {
                error!("{}", e);
                self.status.write().last_error = Some(e.to_string());
                self.set_state(CaptureProcessState::Stopped);
                return Err(e);
            }
        };

        let pid = child.id();
        info!(
            "Started capture engine {} (pid {:?}, port {})",
            self.config.program, pid, self.config.port
        );
        {
            let mut status = self.status.write();
            status.pid = pid;
            status.started_at = Some(Utc::now());
        }
        self.set_state(CaptureProcessState::Starting);

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let grace = self.config.stop_grace;
        let events = self.events.clone();
        let watcher = tokio::spawn(async move {
            let exited = tokio::select! {
                status = child.wait() => Some(ExitOutcome::from_status(status)),
                _ = kill_rx => None,
            };
            let outcome = match exited {
                Some(outcome) => outcome,
                None => engine::terminate(&mut child, grace).await,
            };
            if let Some(tx) = events.upgrade() {
                let _ = tx.send(Event::Exited { epoch, outcome });
            }
        });

        let port = self.config.port;
        let limit = self.config.startup_timeout;
        let events = self.events.clone();
        let probe = tokio::spawn(async move {
            let listening = engine::wait_until_listening(port, limit).await;
            if let Some(tx) = events.upgrade() {
                let _ = tx.send(Event::Ready { epoch, listening });
            }
        });

        self.engine = Some(RunningEngine {
            kill: Some(kill_tx),
            watcher,
            probe,
        });
        Ok(())
    }

    async fn stop_engine(&mut self) {
        self.epoch += 1;

        if let Some(mut engine) = self.engine.take() {
            engine.probe.abort();
            if let Some(kill) = engine.kill.take() {
                let _ = kill.send(());
            }
            if let Err(e) = engine.watcher.await {
                warn!("Capture engine watcher failed: {}", e);
            }
            info!("Stopped capture engine");
        }

        self.status.write().pid = None;
        self.set_state(CaptureProcessState::Stopped);
    }

    fn on_ready(&mut self, epoch: u64, listening: bool) {
        if epoch != self.epoch || self.current() != CaptureProcessState::Starting {
            return;
        }
        if listening {
            info!("Capture engine listening on port {}", self.config.port);
        } else {
            warn!(
                "Capture engine port {} not reachable after {:?}, assuming running",
                self.config.port, self.config.startup_timeout
            );
        }
        self.set_state(CaptureProcessState::Running);
    }

    fn on_exit(&mut self, epoch: u64, outcome: ExitOutcome) {
        if epoch != self.epoch {
            debug!("Ignoring exit of a replaced capture engine ({})", outcome);
            return;
        }
        if let Some(engine) = self.engine.take() {
            engine.probe.abort();
        }
        {
            let mut status = self.status.write();
            status.pid = None;
            status.last_exit = Some(outcome.to_string());
        }

        if outcome.is_clean() {
            info!("Capture engine exited cleanly");
            self.set_state(CaptureProcessState::Stopped);
            return;
        }

        let err = MonitorError::ProcessExit(outcome.to_string());
        self.status.write().last_error = Some(err.to_string());

        if !self.config.auto_restart {
            error!("{}", err);
            self.set_state(CaptureProcessState::Crashed);
            return;
        }

        warn!("{}, restarting in {:?}", err, self.config.restart_delay);
        self.set_state(CaptureProcessState::Stopped);

        let delay = self.config.restart_delay;
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = events.upgrade() {
                let _ = tx.send(Event::RestartDue { epoch });
            }
        });
    }

    fn on_restart_due(&mut self, epoch: u64) {
        if epoch != self.epoch || self.engine.is_some() {
            debug!("Skipping stale capture engine restart");
            return;
        }
        self.status.write().restarts += 1;
        if let Err(e) = self.start_engine() {
            error!("Automatic capture engine restart failed: {}", e);
        }
    }
}
