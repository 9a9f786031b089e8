//! Poll loop behavior with a scripted telemetry source and a recording
//! engine control.

use chrono::Utc;
use conn_monitor::config::PollerConfig;
use conn_monitor::poller::{
    Diagnostics, PollOutcome, TelemetryPayload, TelemetryPoller, TelemetrySource,
};
use conn_monitor::store::MemoryStore;
use conn_monitor::supervisor::EngineControl;
use conn_monitor::{
    CaptureProcessState, ConnectionId, ConnectionRecord, ConnectionRegistry, FilterSpec,
    MonitorError, Protocol, Result,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

// ============================================================================
// FAKES
// ============================================================================

#[derive(Default)]
struct ScriptedSource {
    replies: Mutex<VecDeque<Result<TelemetryPayload>>>,
    fetches: AtomicUsize,
}

impl ScriptedSource {
    fn push_ok(&self, count: i64, diagnostics: Option<Diagnostics>) {
        self.replies.lock().push_back(Ok(TelemetryPayload {
            connections: (1..=count).map(record).collect(),
            diagnostics,
        }));
    }

    fn push_err(&self, n: usize) {
        let mut replies = self.replies.lock();
        for _ in 0..n {
            replies.push_back(Err(MonitorError::Status(503)));
        }
    }
}

impl TelemetrySource for ScriptedSource {
    fn fetch(&self) -> impl Future<Output = Result<TelemetryPayload>> + Send {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or(Err(MonitorError::Timeout(Duration::from_secs(2))));
        async move { reply }
    }
}

struct RecordingControl {
    state: Mutex<CaptureProcessState>,
    calls: Mutex<Vec<(&'static str, Instant)>>,
}

impl RecordingControl {
    fn new(state: CaptureProcessState) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn call_names(&self) -> Vec<&'static str> {
        self.calls.lock().iter().map(|(name, _)| *name).collect()
    }
}

impl EngineControl for RecordingControl {
    fn state(&self) -> CaptureProcessState {
        *self.state.lock()
    }

    fn start(&self) -> impl Future<Output = Result<()>> + Send {
        self.calls.lock().push(("start", Instant::now()));
        *self.state.lock() = CaptureProcessState::Running;
        async { Ok(()) }
    }

    fn stop(&self) -> impl Future<Output = Result<()>> + Send {
        self.calls.lock().push(("stop", Instant::now()));
        *self.state.lock() = CaptureProcessState::Stopped;
        async { Ok(()) }
    }
}

fn record(id: i64) -> ConnectionRecord {
    let now = Utc::now();
    ConnectionRecord {
        id: ConnectionId::Num(id),
        src_addr: "192.168.1.10".into(),
        src_port: 50000,
        dst_addr: "1.1.1.1".into(),
        dst_port: 53,
        protocol: Protocol::Udp,
        service: "DNS".into(),
        bytes: 64,
        packets: 1,
        domain: None,
        country: None,
        asn: None,
        first_seen: now,
        last_seen: now,
        active: true,
    }
}

fn config() -> PollerConfig {
    PollerConfig {
        enabled: true,
        interval: Duration::from_millis(20),
        request_timeout: Duration::from_millis(100),
        retry_delay: Duration::from_millis(30),
        failure_threshold: 5,
        restart_cooldown: Duration::from_millis(100),
    }
}

type Poller = TelemetryPoller<Arc<ScriptedSource>, Arc<RecordingControl>>;

fn poller(
    state: CaptureProcessState,
) -> (Poller, Arc<ScriptedSource>, Arc<RecordingControl>, Arc<ConnectionRegistry>) {
    let source = Arc::new(ScriptedSource::default());
    let control = RecordingControl::new(state);
    let registry = Arc::new(ConnectionRegistry::new(Arc::new(MemoryStore::new())).unwrap());
    let poller = TelemetryPoller::new(source.clone(), control.clone(), registry.clone(), config());
    (poller, source, control, registry)
}

// ============================================================================
// TESTS
// ============================================================================

#[tokio::test]
async fn test_five_failures_restart_engine() {
    let (poller, source, control, _) = poller(CaptureProcessState::Running);
    source.push_err(5);

    for expected in 1..=4 {
        assert_eq!(
            poller.poll_once().await,
            PollOutcome::Failed { failures: expected }
        );
    }
    assert!(control.call_names().is_empty());

    assert_eq!(poller.poll_once().await, PollOutcome::Restarted);
    assert_eq!(control.call_names(), vec!["stop", "start"]);
    assert_eq!(poller.consecutive_failures(), 0);
    assert_eq!(poller.status().restarts, 1);

    let calls = control.calls.lock();
    assert!(calls[1].1 - calls[0].1 >= Duration::from_millis(100));
}

#[tokio::test]
async fn test_success_resets_failures_and_ingests() {
    let (poller, source, _, registry) = poller(CaptureProcessState::Running);
    source.push_err(3);
    let diagnostics = Diagnostics {
        total_packets: 42,
        tcp_packets: 40,
        ..Diagnostics::default()
    };
    source.push_ok(7, Some(diagnostics.clone()));

    for _ in 0..3 {
        poller.poll_once().await;
    }
    assert_eq!(poller.consecutive_failures(), 3);
    assert!(poller.status().last_error.is_some());

    assert_eq!(poller.poll_once().await, PollOutcome::Updated(7));
    let status = poller.status();
    assert_eq!(status.consecutive_failures, 0);
    assert!(status.last_update.is_some());
    assert!(status.last_error.is_none());
    assert_eq!(status.diagnostics, Some(diagnostics));
    assert_eq!(registry.snapshot().len(), 7);
}

#[tokio::test]
async fn test_failed_poll_keeps_previous_snapshot() {
    let (poller, source, _, registry) = poller(CaptureProcessState::Running);
    source.push_ok(4, None);
    source.push_err(1);

    poller.poll_once().await;
    assert_eq!(
        poller.poll_once().await,
        PollOutcome::Failed { failures: 1 }
    );
    assert_eq!(registry.snapshot().len(), 4);
}

#[tokio::test]
async fn test_no_fetch_unless_running() {
    let (poller, source, control, _) = poller(CaptureProcessState::Starting);

    assert_eq!(
        poller.poll_once().await,
        PollOutcome::Skipped(CaptureProcessState::Starting)
    );
    *control.state.lock() = CaptureProcessState::Stopped;
    assert_eq!(
        poller.poll_once().await,
        PollOutcome::Skipped(CaptureProcessState::Stopped)
    );
    assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_poll_picks_up_favorites_saved_elsewhere() {
    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(ConnectionRegistry::new(store.clone()).unwrap());
    registry.apply_filter(FilterSpec::default().favorites_only());
    let source = Arc::new(ScriptedSource::default());
    let control = RecordingControl::new(CaptureProcessState::Running);
    let poller = TelemetryPoller::new(source.clone(), control, registry.clone(), config());

    // A second handle on the same store, as the viewer CLI opens it
    let viewer = ConnectionRegistry::new(store).unwrap();
    viewer.toggle_favorite(&ConnectionId::Num(3)).unwrap();
    viewer.mark_cleared().unwrap();

    source.push_ok(5, None);
    assert_eq!(poller.poll_once().await, PollOutcome::Updated(5));
    assert!(registry.is_favorite(&ConnectionId::Num(3)));
    assert_eq!(ids(&registry.view()), vec![ConnectionId::Num(3)]);
    assert!(registry.last_cleared().is_some());
}

fn ids(records: &[ConnectionRecord]) -> Vec<ConnectionId> {
    records.iter().map(|r| r.id.clone()).collect()
}

#[test]
fn test_next_delay_by_outcome() {
    let config = config();
    assert_eq!(PollOutcome::Updated(1).next_delay(&config), config.interval);
    assert_eq!(
        PollOutcome::Failed { failures: 1 }.next_delay(&config),
        config.retry_delay
    );
    assert_eq!(PollOutcome::Restarted.next_delay(&config), config.interval);
}

#[tokio::test]
async fn test_run_loop_escalates_and_stops_on_shutdown() {
    let (poller, _source, control, _) = poller(CaptureProcessState::Running);
    let poller = Arc::new(poller);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let task = poller.clone().spawn(shutdown_rx);

    // Empty script: every fetch times out
    let deadline = Instant::now() + Duration::from_secs(3);
    while control.call_names().len() < 2 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(&control.call_names()[..2], &["stop", "start"]);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("poller did not stop")
        .unwrap();
}
