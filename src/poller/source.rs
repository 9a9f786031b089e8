//! Transports that fetch telemetry from the capture engine.

use super::payload::{parse_payload, TelemetryPayload};
use crate::error::{MonitorError, Result};
use log::debug;
use reqwest::Client;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// One fetch of the current connection list.
pub trait TelemetrySource: Send + Sync {
    fn fetch(&self) -> impl Future<Output = Result<TelemetryPayload>> + Send;
}

impl<T: TelemetrySource> TelemetrySource for Arc<T> {
    fn fetch(&self) -> impl Future<Output = Result<TelemetryPayload>> + Send {
        (**self).fetch()
    }
}

/// Fetches `GET <url>` over HTTP with a per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpTelemetrySource {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpTelemetrySource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn fetch_inner(&self) -> Result<TelemetryPayload> {
        let response = self.client.get(&self.url).send().await.map_err(|e| {
            if e.is_timeout() {
                MonitorError::Timeout(self.timeout)
            } else {
                MonitorError::Transport(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(MonitorError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                MonitorError::Timeout(self.timeout)
            } else {
                MonitorError::Transport(e)
            }
        })?;
        let payload = parse_payload(&body)?;

        debug!(
            "Fetched {} connections from {}",
            payload.connections.len(),
            self.url
        );
        Ok(payload)
    }
}

impl TelemetrySource for HttpTelemetrySource {
    fn fetch(&self) -> impl Future<Output = Result<TelemetryPayload>> + Send {
        self.fetch_inner()
    }
}
