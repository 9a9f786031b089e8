//! Runtime configuration.
//!
//! Values are layered: built-in defaults, then an optional JSON file, then
//! `CONN_MONITOR_*` environment variables, then command-line flags applied by
//! the binaries.

use crate::error::{MonitorError, Result};
use crate::registry::DEFAULT_PAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Durations are written as integer milliseconds in config files.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

// ================================================================================================
// ENGINE
// ================================================================================================

/// How to launch the external capture engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Local port the engine serves telemetry on
    pub port: u16,
    /// Ask the engine to generate synthetic traffic
    pub simulate: bool,
    /// Longest wait for the engine port before declaring it running anyway
    #[serde(with = "duration_ms")]
    pub startup_timeout: Duration,
    /// Time between SIGTERM and a forced kill
    #[serde(with = "duration_ms")]
    pub stop_grace: Duration,
    #[serde(with = "duration_ms")]
    pub restart_delay: Duration,
    /// Restart automatically after an abnormal exit
    pub auto_restart: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec![
                "backend/src/real_traffic_capture.py".to_string(),
                "--serve".to_string(),
            ],
            port: 8000,
            simulate: false,
            startup_timeout: Duration::from_secs(10),
            stop_grace: Duration::from_secs(3),
            restart_delay: Duration::from_secs(5),
            auto_restart: true,
        }
    }
}

impl EngineConfig {
    /// Full argument list: configured args, then `--port` and `--simulate`.
    pub fn command_args(&self) -> Vec<String> {
        let mut args = self.args.clone();
        args.push("--port".to_string());
        args.push(self.port.to_string());
        if self.simulate {
            args.push("--simulate".to_string());
        }
        args
    }

    pub fn telemetry_url(&self) -> String {
        format!("http://127.0.0.1:{}/connections", self.port)
    }
}

// ================================================================================================
// POLLER
// ================================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub enabled: bool,
    #[serde(with = "duration_ms")]
    pub interval: Duration,
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,
    /// Delay before the next attempt after a failed fetch
    #[serde(with = "duration_ms")]
    pub retry_delay: Duration,
    /// Consecutive failures that trigger an engine restart
    pub failure_threshold: u32,
    /// Pause between stopping and restarting the engine
    #[serde(with = "duration_ms")]
    pub restart_cooldown: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(2),
            retry_delay: Duration::from_secs(5),
            failure_threshold: 5,
            restart_cooldown: Duration::from_secs(2),
        }
    }
}

// ================================================================================================
// STORE / FIREWALL
// ================================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./var/data/conn_monitor.db"),
        }
    }
}

/// Command used to block and unblock flows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirewallConfig {
    pub program: String,
    pub args: Vec<String>,
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["backend/src/block_connection.py".to_string()],
            timeout: Duration::from_secs(10),
        }
    }
}

// ================================================================================================
// TOP LEVEL
// ================================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub engine: EngineConfig,
    pub poller: PollerConfig,
    pub store: StoreConfig,
    pub firewall: FirewallConfig,
    pub page_size: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            poller: PollerConfig::default(),
            store: StoreConfig::default(),
            firewall: FirewallConfig::default(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl MonitorConfig {
    /// Reads a JSON config file. Missing fields keep their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| MonitorError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Applies `CONN_MONITOR_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("CONN_MONITOR_PORT") {
            self.engine.port = port.parse().map_err(|_| {
                MonitorError::Config(format!("invalid CONN_MONITOR_PORT '{}'", port))
            })?;
        }
        if let Some(program) = lookup("CONN_MONITOR_ENGINE") {
            self.engine.program = program;
        }
        if let Some(path) = lookup("CONN_MONITOR_DB") {
            self.store.path = PathBuf::from(path);
        }
        if let Some(flag) = lookup("CONN_MONITOR_SIMULATE") {
            self.engine.simulate = matches!(flag.as_str(), "1" | "true" | "yes");
        }
        Ok(())
    }
}
