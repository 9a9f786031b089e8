//! Telemetry payload parsing.
//!
//! The engine answers `/connections` with either a bare JSON array of records
//! or an envelope `{"connections": [...], "diagnostics": {...}}`.

use crate::error::{MonitorError, Result};
use crate::types::{parse_timestamp, ConnectionRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Packet counters reported by the engine alongside the connection list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    #[serde(default)]
    pub total_packets: u64,
    #[serde(default)]
    pub tcp_packets: u64,
    #[serde(default)]
    pub udp_packets: u64,
    #[serde(default)]
    pub icmp_packets: u64,
    #[serde(default)]
    pub other_packets: u64,
    #[serde(default, deserialize_with = "optional_timestamp")]
    pub last_packet_time: Option<DateTime<Utc>>,
}

fn optional_timestamp<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(text) => parse_timestamp(&text)
            .map(Some)
            .map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryPayload {
    pub connections: Vec<ConnectionRecord>,
    pub diagnostics: Option<Diagnostics>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPayload {
    Bare(Vec<ConnectionRecord>),
    Envelope {
        connections: Vec<ConnectionRecord>,
        #[serde(default)]
        diagnostics: Option<Diagnostics>,
    },
}

/// Parses a response body. Records come back normalized.
pub fn parse_payload(body: &[u8]) -> Result<TelemetryPayload> {
    let raw: RawPayload = serde_json::from_slice(body).map_err(MonitorError::Payload)?;

    let (connections, diagnostics) = match raw {
        RawPayload::Bare(connections) => (connections, None),
        RawPayload::Envelope {
            connections,
            diagnostics,
        } => (connections, diagnostics),
    };

    Ok(TelemetryPayload {
        connections: connections
            .into_iter()
            .map(ConnectionRecord::normalize)
            .collect(),
        diagnostics,
    })
}
