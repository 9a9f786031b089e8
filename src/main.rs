//! # Connection Monitor Daemon
//!
//! Starts the capture engine, polls it for telemetry and logs a periodic
//! summary of the connection registry until interrupted.

use anyhow::Context;
use clap::Parser;
use conn_monitor::store::{KeyValueStore, MemoryStore, SqliteStore};
use conn_monitor::{format_bytes, ConnectionMonitor, MonitorConfig};
use env_logger::Env;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "conn-monitor")]
#[command(
    about = "Supervise the capture engine and keep a live connection registry",
    long_about = None
)]
struct Args {
    /// JSON config file
    #[arg(short, long, env = "CONN_MONITOR_CONFIG")]
    config: Option<PathBuf>,

    /// Telemetry port of the capture engine
    #[arg(short, long)]
    port: Option<u16>,

    /// Capture engine executable
    #[arg(long)]
    engine: Option<String>,

    /// Arguments for the capture engine (repeatable)
    #[arg(long = "engine-arg")]
    engine_args: Vec<String>,

    /// Ask the engine to generate simulated traffic
    #[arg(long)]
    simulate: bool,

    /// Path of the SQLite store for favorites and the history marker
    #[arg(long)]
    db: Option<PathBuf>,

    /// Keep favorites and the history marker in memory only
    #[arg(long)]
    no_persist: bool,

    /// Seconds between summary log lines
    #[arg(long, default_value_t = 30)]
    summary_interval: u64,
}

impl Args {
    fn into_config(self) -> anyhow::Result<(MonitorConfig, bool, Duration)> {
        let mut config = match &self.config {
            Some(path) => MonitorConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => MonitorConfig::default(),
        };
        config.apply_env()?;

        if let Some(port) = self.port {
            config.engine.port = port;
        }
        if let Some(engine) = self.engine {
            config.engine.program = engine;
        }
        if !self.engine_args.is_empty() {
            config.engine.args = self.engine_args;
        }
        if self.simulate {
            config.engine.simulate = true;
        }
        if let Some(db) = self.db {
            config.store.path = db;
        }

        Ok((
            config,
            self.no_persist,
            Duration::from_secs(self.summary_interval.max(1)),
        ))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let (config, no_persist, summary_every) = Args::parse().into_config()?;

    info!("=================================================");
    info!("  Connection Monitor");
    info!("=================================================");
    info!(
        "Engine: {} {}",
        config.engine.program,
        config.engine.command_args().join(" ")
    );
    info!("Telemetry: {}", config.engine.telemetry_url());

    let store: Arc<dyn KeyValueStore> = if no_persist {
        info!("Store: in-memory");
        Arc::new(MemoryStore::new())
    } else {
        info!("Store: {}", config.store.path.display());
        Arc::new(
            SqliteStore::open(&config.store.path)
                .with_context(|| format!("opening store {}", config.store.path.display()))?,
        )
    };

    let monitor = ConnectionMonitor::with_store(config, store)?;

    if let Err(e) = monitor.start().await {
        error!("Capture engine did not start: {}", e);
    }

    let mut ticker = tokio::time::interval(summary_every);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => log_summary(&monitor),
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("Failed to listen for Ctrl+C: {}", e);
                }
                break;
            }
        }
    }

    monitor.shutdown().await?;
    info!("Connection monitor shut down");
    Ok(())
}

fn log_summary(monitor: &ConnectionMonitor) {
    let summary = monitor.summary();
    let total_bytes: u64 = monitor.registry().snapshot().iter().map(|r| r.bytes).sum();

    info!(
        "engine={} connections={} active={} favorites={} traffic={} failures={} restarts={}",
        summary.engine.state,
        summary.registry.total,
        summary.registry.active,
        summary.registry.favorites,
        format_bytes(total_bytes),
        summary.poller.consecutive_failures,
        summary.poller.restarts + summary.engine.restarts,
    );

    if let Some(diag) = &summary.poller.diagnostics {
        info!(
            "packets total={} tcp={} udp={} icmp={} other={}",
            diag.total_packets,
            diag.tcp_packets,
            diag.udp_packets,
            diag.icmp_packets,
            diag.other_packets
        );
    }
}
