//! Telemetry polling: payload parsing, transports and the poll loop.

pub mod payload;
pub mod scheduler;
pub mod source;

pub use payload::{parse_payload, Diagnostics, TelemetryPayload};
pub use scheduler::{PollOutcome, PollerStatus, TelemetryPoller};
pub use source::{HttpTelemetrySource, TelemetrySource};
