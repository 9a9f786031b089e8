//! Capture engine supervision.

pub mod capture;
pub mod engine;
pub mod state;

pub use capture::CaptureSupervisor;
pub use engine::ExitOutcome;
pub use state::{CaptureProcessState, SupervisorStatus};

use crate::error::Result;
use std::future::Future;
use std::sync::Arc;

/// Engine lifecycle as seen by the telemetry poller.
pub trait EngineControl: Send + Sync {
    fn state(&self) -> CaptureProcessState;

    fn start(&self) -> impl Future<Output = Result<()>> + Send;

    fn stop(&self) -> impl Future<Output = Result<()>> + Send;
}

impl EngineControl for CaptureSupervisor {
    fn state(&self) -> CaptureProcessState {
        CaptureSupervisor::state(self)
    }

    fn start(&self) -> impl Future<Output = Result<()>> + Send {
        CaptureSupervisor::start(self)
    }

    fn stop(&self) -> impl Future<Output = Result<()>> + Send {
        CaptureSupervisor::stop(self)
    }
}

impl<T: EngineControl> EngineControl for Arc<T> {
    fn state(&self) -> CaptureProcessState {
        (**self).state()
    }

    fn start(&self) -> impl Future<Output = Result<()>> + Send {
        (**self).start()
    }

    fn stop(&self) -> impl Future<Output = Result<()>> + Send {
        (**self).stop()
    }
}
