use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Lifecycle state of the capture engine process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CaptureProcessState {
    Stopped,
    /// Spawned, port not yet accepting connections
    Starting,
    Running,
    /// Exited abnormally with automatic restart disabled
    Crashed,
}

impl CaptureProcessState {
    pub fn is_alive(&self) -> bool {
        matches!(self, CaptureProcessState::Starting | CaptureProcessState::Running)
    }
}

impl fmt::Display for CaptureProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureProcessState::Stopped => "stopped",
            CaptureProcessState::Starting => "starting",
            CaptureProcessState::Running => "running",
            CaptureProcessState::Crashed => "crashed",
        };
        f.write_str(name)
    }
}

/// Supervisor bookkeeping exposed to status lines.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorStatus {
    pub state: CaptureProcessState,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    /// Automatic restarts after abnormal exits
    pub restarts: u32,
    pub last_exit: Option<String>,
    pub last_error: Option<String>,
}

impl Default for SupervisorStatus {
    fn default() -> Self {
        Self {
            state: CaptureProcessState::Stopped,
            pid: None,
            started_at: None,
            restarts: 0,
            last_exit: None,
            last_error: None,
        }
    }
}
