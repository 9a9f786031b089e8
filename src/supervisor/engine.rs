//! Child-process plumbing for the capture engine.

use crate::config::EngineConfig;
use crate::error::{MonitorError, Result};
use log::{debug, info, warn};
use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout, Instant};

const PROBE_INTERVAL: Duration = Duration::from_millis(200);

/// How an engine process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    Exited(i32),
    /// Ended without an exit code (signal)
    Terminated,
    WaitFailed(String),
}

impl ExitOutcome {
    pub fn from_status(status: std::io::Result<ExitStatus>) -> Self {
        match status {
            Ok(status) => status
                .code()
                .map(ExitOutcome::Exited)
                .unwrap_or(ExitOutcome::Terminated),
            Err(e) => ExitOutcome::WaitFailed(e.to_string()),
        }
    }

    pub fn is_clean(&self) -> bool {
        matches!(self, ExitOutcome::Exited(0))
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Exited(code) => write!(f, "exit code {}", code),
            ExitOutcome::Terminated => f.write_str("terminated by signal"),
            ExitOutcome::WaitFailed(e) => write!(f, "wait failed: {}", e),
        }
    }
}

/// Spawns the engine with piped output forwarded to the log.
pub fn spawn(config: &EngineConfig) -> Result<Child> {
    let mut child = Command::new(&config.program)
        .args(config.command_args())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| MonitorError::Spawn {
            program: config.program.clone(),
            source,
        })?;

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_output(stdout));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_output(stderr));
    }

    Ok(child)
}

async fn forward_output<R: AsyncRead + Unpin>(stream: R) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => info!(target: "capture_engine", "{}", line),
            Ok(None) => break,
            Err(e) => {
                debug!("Engine output closed: {}", e);
                break;
            }
        }
    }
}

/// Asks the engine to exit with SIGTERM and kills it once `grace` elapses.
pub async fn terminate(child: &mut Child, grace: Duration) -> ExitOutcome {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: pid belongs to a child we have not yet reaped.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }
    }

    match timeout(grace, child.wait()).await {
        Ok(status) => ExitOutcome::from_status(status),
        Err(_) => {
            warn!("Capture engine ignored SIGTERM for {:?}, killing", grace);
            if let Err(e) = child.kill().await {
                warn!("Failed to kill capture engine: {}", e);
            }
            ExitOutcome::from_status(child.wait().await)
        }
    }
}

/// Polls until `port` on localhost accepts a TCP connection or `limit`
/// elapses. Returns whether the port was seen listening.
pub async fn wait_until_listening(port: u16, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    loop {
        if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return true;
        }
        if Instant::now() + PROBE_INTERVAL > deadline {
            return false;
        }
        sleep(PROBE_INTERVAL).await;
    }
}
