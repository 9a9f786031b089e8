//! Core record types shared by the registry, the poller and the viewer.
//!
//! A [`ConnectionRecord`] mirrors one entry of the capture engine's
//! `/connections` payload. Field names follow the engine's camelCase JSON.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since UNIX epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ================================================================================================
// CONNECTION ID
// ================================================================================================

/// Identifier of a flow, unique within one engine snapshot.
///
/// The engine emits integers (possibly negative hashes); other producers may
/// emit strings. Both forms round-trip through JSON unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConnectionId {
    Num(i64),
    Text(String),
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionId::Num(n) => write!(f, "{}", n),
            ConnectionId::Text(s) => f.write_str(s),
        }
    }
}

impl FromStr for ConnectionId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().parse::<i64>() {
            Ok(n) => ConnectionId::Num(n),
            Err(_) => ConnectionId::Text(s.to_string()),
        })
    }
}

impl From<i64> for ConnectionId {
    fn from(n: i64) -> Self {
        ConnectionId::Num(n)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        ConnectionId::Text(s.to_string())
    }
}

// ================================================================================================
// PROTOCOL
// ================================================================================================

/// Transport protocol of a flow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Other(String),
}

impl Protocol {
    pub fn as_str(&self) -> &str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Icmp => "ICMP",
            Protocol::Other(name) => name,
        }
    }
}

impl From<&str> for Protocol {
    fn from(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "TCP" => Protocol::Tcp,
            "UDP" => Protocol::Udp,
            "ICMP" => Protocol::Icmp,
            _ => Protocol::Other(s.to_string()),
        }
    }
}

impl From<String> for Protocol {
    fn from(s: String) -> Self {
        Protocol::from(s.as_str())
    }
}

impl From<Protocol> for String {
    fn from(p: Protocol) -> Self {
        p.as_str().to_string()
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ================================================================================================
// CONNECTION RECORD
// ================================================================================================

fn unknown_service() -> String {
    "Unknown".to_string()
}

/// One observed source/destination conversation with cumulative counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    pub id: ConnectionId,
    pub src_addr: String,
    #[serde(default)]
    pub src_port: u16,
    pub dst_addr: String,
    #[serde(default)]
    pub dst_port: u16,
    pub protocol: Protocol,
    /// Resolved application label, "Unknown" when the engine could not tell
    #[serde(default = "unknown_service")]
    pub service: String,
    #[serde(default)]
    pub bytes: u64,
    #[serde(default)]
    pub packets: u64,
    #[serde(default, deserialize_with = "non_empty")]
    pub domain: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub country: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub asn: Option<String>,
    #[serde(deserialize_with = "flexible_timestamp")]
    pub first_seen: DateTime<Utc>,
    #[serde(deserialize_with = "flexible_timestamp")]
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub active: bool,
}

impl ConnectionRecord {
    /// Clamps `last_seen` so that `last_seen >= first_seen` always holds.
    pub fn normalize(mut self) -> Self {
        if self.last_seen < self.first_seen {
            self.last_seen = self.first_seen;
        }
        self
    }
}

/// Empty strings from the engine mean "not resolved".
fn non_empty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Millis(i64),
    Text(String),
}

/// Accepts RFC 3339, naive ISO-8601 (host local time) or epoch milliseconds.
fn flexible_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    match RawTimestamp::deserialize(deserializer)? {
        RawTimestamp::Millis(ms) => Utc
            .timestamp_millis_opt(ms)
            .single()
            .ok_or_else(|| serde::de::Error::custom(format!("timestamp out of range: {}", ms))),
        RawTimestamp::Text(text) => parse_timestamp(&text).map_err(serde::de::Error::custom),
    }
}

/// Parses a timestamp string in any of the forms the engine is known to emit.
///
/// Strings without an offset are the engine's `datetime.now()` output and are
/// read in the host's local zone.
pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, String> {
    parse_timestamp_in(text, &Local)
}

/// Like [`parse_timestamp`], reading offset-less strings in `zone`.
pub fn parse_timestamp_in<Tz: TimeZone>(text: &str, zone: &Tz) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .map_err(|e| format!("invalid timestamp '{}': {}", text, e))?;
    zone.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| format!("timestamp '{}' does not exist in the local time zone", text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_from_engine_json() {
        let json = r#"{
            "id": -8271652,
            "srcAddr": "192.168.1.100",
            "srcPort": 50001,
            "dstAddr": "142.250.190.78",
            "dstPort": 443,
            "protocol": "TCP",
            "service": "HTTPS",
            "bytes": 20000,
            "packets": 20,
            "domain": "google.com",
            "country": "Unknown",
            "asn": "Unknown",
            "firstSeen": "2024-03-01T10:15:30.123456",
            "lastSeen": "2024-03-01T10:16:00.000001",
            "active": true
        }"#;

        let record: ConnectionRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, ConnectionId::Num(-8271652));
        assert_eq!(record.protocol, Protocol::Tcp);
        assert_eq!(record.domain.as_deref(), Some("google.com"));
        let local = Local.with_ymd_and_hms(2024, 3, 1, 10, 15, 30).earliest().unwrap();
        assert_eq!(record.first_seen.timestamp(), local.timestamp());
        assert!(record.last_seen >= record.first_seen);
    }

    #[test]
    fn test_empty_domain_is_none() {
        let json = r#"{"id": "abc", "srcAddr": "10.0.0.1", "dstAddr": "10.0.0.2",
            "protocol": "udp", "domain": "", "firstSeen": 1700000000000, "lastSeen": 1700000000500}"#;
        let record: ConnectionRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, ConnectionId::Text("abc".into()));
        assert_eq!(record.protocol, Protocol::Udp);
        assert_eq!(record.service, "Unknown");
        assert!(record.domain.is_none());
        assert!(record.country.is_none());
    }

    #[test]
    fn test_rfc3339_timestamp() {
        let ts = parse_timestamp("2024-03-01T10:15:30+02:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-03-01T08:15:30+00:00");
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_naive_timestamp_uses_zone_offset() {
        let pacific = chrono::FixedOffset::west_opt(7 * 3600).unwrap();
        let ts = parse_timestamp_in("2024-03-01T10:15:30", &pacific).unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-03-01T17:15:30+00:00");

        let ts = parse_timestamp_in("2024-03-01 10:15:30.5", &Utc).unwrap();
        assert_eq!(ts.timestamp_millis(), 1709288130500);

        // Explicit offsets ignore the zone
        let ts = parse_timestamp_in("2024-03-01T10:15:30Z", &pacific).unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-03-01T10:15:30+00:00");
    }

    #[test]
    fn test_protocol_other_keeps_name() {
        let p = Protocol::from("GRE");
        assert_eq!(p, Protocol::Other("GRE".into()));
        assert_eq!(p.to_string(), "GRE");
        assert_eq!(Protocol::from("icmp"), Protocol::Icmp);
    }

    #[test]
    fn test_connection_id_from_str() {
        assert_eq!("42".parse::<ConnectionId>().unwrap(), ConnectionId::Num(42));
        assert_eq!(
            "flow-a".parse::<ConnectionId>().unwrap(),
            ConnectionId::Text("flow-a".into())
        );
    }

    #[test]
    fn test_normalize_clamps_last_seen() {
        let json = r#"{"id": 1, "srcAddr": "a", "dstAddr": "b", "protocol": "TCP",
            "firstSeen": 2000, "lastSeen": 1000}"#;
        let record: ConnectionRecord = serde_json::from_str(json).unwrap();
        let record = record.normalize();
        assert_eq!(record.last_seen, record.first_seen);
    }
}
