//! Live connection monitoring pipeline.
//!
//! - [`supervisor`]: owns the external capture engine process
//! - [`poller`]: fetches telemetry from the engine and drives restarts on sustained failure
//! - [`registry`]: snapshot, filter, sort, pages, favorites and history clearing
//! - [`store`]: persisted favorites and history marker
//! - [`firewall`]: block/unblock through the external firewall command

pub mod config;
pub mod error;
pub mod firewall;
pub mod format;
pub mod monitor;
pub mod poller;
pub mod registry;
pub mod store;
pub mod supervisor;
pub mod types;

pub use config::MonitorConfig;
pub use error::{MonitorError, Result};
pub use format::format_bytes;
pub use monitor::{ConnectionMonitor, MonitorSummary};
pub use registry::{
    ConnectionRegistry, FilterSpec, HistoryPeriod, Page, SortColumn, SortDirection, SortSpec,
};
pub use supervisor::{CaptureProcessState, CaptureSupervisor};
pub use types::{ConnectionId, ConnectionRecord, Protocol};
