//! Wires the store, registry, supervisor, poller and firewall adapter into
//! one explicitly started and shut down pipeline.

use crate::config::MonitorConfig;
use crate::error::Result;
use crate::firewall::{BlockRequest, BlockedRule, CommandBlocker, CommandResult};
use crate::poller::{HttpTelemetrySource, PollerStatus, TelemetryPoller};
use crate::registry::{ConnectionRegistry, RegistryStats};
use crate::store::{KeyValueStore, SqliteStore};
use crate::supervisor::{CaptureSupervisor, SupervisorStatus};
use crate::types::ConnectionId;
use log::{info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

type HttpPoller = TelemetryPoller<HttpTelemetrySource, CaptureSupervisor>;

/// Combined status of every pipeline stage.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSummary {
    pub engine: SupervisorStatus,
    pub poller: PollerStatus,
    pub registry: RegistryStats,
}

pub struct ConnectionMonitor {
    config: MonitorConfig,
    registry: Arc<ConnectionRegistry>,
    supervisor: CaptureSupervisor,
    poller: Arc<HttpPoller>,
    poller_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
    blocker: CommandBlocker,
}

impl ConnectionMonitor {
    /// Builds the pipeline on the SQLite store named in `config`.
    pub fn open(config: MonitorConfig) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(&config.store.path)?);
        Self::with_store(config, store)
    }

    /// Builds the pipeline on `store`. Must be called inside a tokio runtime.
    pub fn with_store(config: MonitorConfig, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let registry = Arc::new(ConnectionRegistry::new(store)?);
        let supervisor = CaptureSupervisor::spawn(config.engine.clone());
        let source = HttpTelemetrySource::new(
            config.engine.telemetry_url(),
            config.poller.request_timeout,
        )?;
        let poller = Arc::new(TelemetryPoller::new(
            source,
            supervisor.clone(),
            registry.clone(),
            config.poller.clone(),
        ));
        let (shutdown, _) = watch::channel(false);
        let blocker = CommandBlocker::new(config.firewall.clone());

        Ok(Self {
            config,
            registry,
            supervisor,
            poller,
            poller_task: Mutex::new(None),
            shutdown,
            blocker,
        })
    }

    /// Starts the poll loop (once) and the capture engine. A spawn failure is
    /// returned; the poll loop keeps waiting for a later successful start.
    pub async fn start(&self) -> Result<()> {
        if self.config.poller.enabled {
            let mut task = self.poller_task.lock();
            if task.is_none() {
                *task = Some(self.poller.clone().spawn(self.shutdown.subscribe()));
            }
        }

        self.supervisor.start().await
    }

    /// Stops polling and terminates the engine.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down connection monitor");
        self.shutdown.send_replace(true);

        let task = self.poller_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Telemetry poller task failed: {}", e);
            }
        }

        self.supervisor.shutdown().await
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn supervisor(&self) -> &CaptureSupervisor {
        &self.supervisor
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn poller_status(&self) -> PollerStatus {
        self.poller.status()
    }

    pub fn summary(&self) -> MonitorSummary {
        MonitorSummary {
            engine: self.supervisor.status(),
            poller: self.poller.status(),
            registry: self.registry.stats(),
        }
    }

    /// Blocks the flow of record `id` from the latest snapshot.
    pub async fn block(&self, id: &ConnectionId) -> CommandResult {
        match self.registry.record(id) {
            Some(record) => self.blocker.block(&BlockRequest::from_record(&record)).await,
            None => CommandResult::failure(format!("Connection {} not found", id)),
        }
    }

    pub async fn block_request(&self, request: &BlockRequest) -> CommandResult {
        self.blocker.block(request).await
    }

    pub async fn unblock(&self, rule_id: &str) -> CommandResult {
        self.blocker.unblock(rule_id).await
    }

    pub async fn blocked_rules(&self) -> std::result::Result<Vec<BlockedRule>, String> {
        self.blocker.list().await
    }
}

impl std::fmt::Debug for ConnectionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionMonitor")
            .field("engine", &self.supervisor.state())
            .field("registry", &self.registry)
            .finish()
    }
}
