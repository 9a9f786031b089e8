use std::time::Duration;

/// Errors raised inside the monitoring pipeline.
///
/// Transport-class errors (`Transport`, `Timeout`, `Status`, `Payload`) are
/// absorbed by the poller and only counted. `Spawn` is always surfaced to the
/// caller of `start()`. Block/unblock failures never use this type; they are
/// reported through [`crate::firewall::CommandResult`].
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("failed to spawn capture engine `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("capture engine exited abnormally: {0}")]
    ProcessExit(String),
    #[error("telemetry request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("telemetry request timed out after {0:?}")]
    Timeout(Duration),
    #[error("telemetry endpoint returned HTTP {0}")]
    Status(u16),
    #[error("malformed telemetry payload: {0}")]
    Payload(#[source] serde_json::Error),
    #[error("{failures} consecutive telemetry failures, restarting capture engine")]
    SustainedFailure { failures: u32 },
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("corrupt stored value for `{key}`: {source}")]
    StoredValue {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("capture supervisor is no longer running")]
    SupervisorGone,
}

impl MonitorError {
    /// True for failures that only count toward the poller's restart threshold.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MonitorError::Transport(_)
                | MonitorError::Timeout(_)
                | MonitorError::Status(_)
                | MonitorError::Payload(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(MonitorError::Status(503).is_transient());
        assert!(MonitorError::Timeout(Duration::from_secs(2)).is_transient());
        assert!(!MonitorError::SupervisorGone.is_transient());
        assert!(!MonitorError::Config("bad".into()).is_transient());
    }

    #[test]
    fn test_spawn_error_message_names_program() {
        let err = MonitorError::Spawn {
            program: "capture-engine".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        assert_eq!(
            err.to_string(),
            "failed to spawn capture engine `capture-engine`: no such file"
        );
    }
}
