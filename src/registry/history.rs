//! History retention periods and the persisted last-clear marker.

use crate::error::Result;
use crate::store::{KeyValueStore, HISTORY_CLEARED_KEY};
use chrono::{DateTime, Duration, TimeZone, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Retention period offered by a "clear history" action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryPeriod {
    #[serde(rename = "day")]
    Day,
    #[serde(rename = "week")]
    Week,
    #[serde(rename = "10days")]
    TenDays,
    #[serde(rename = "month")]
    Month,
    #[serde(rename = "all")]
    All,
}

impl HistoryPeriod {
    /// Records first seen before this instant are removed.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            HistoryPeriod::Day => now - Duration::hours(24),
            HistoryPeriod::Week => now - Duration::days(7),
            HistoryPeriod::TenDays => now - Duration::days(10),
            HistoryPeriod::Month => now - Duration::days(30),
            HistoryPeriod::All => DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryPeriod::Day => "day",
            HistoryPeriod::Week => "week",
            HistoryPeriod::TenDays => "10days",
            HistoryPeriod::Month => "month",
            HistoryPeriod::All => "all",
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            HistoryPeriod::Day => "older than 24 hours",
            HistoryPeriod::Week => "older than 7 days",
            HistoryPeriod::TenDays => "older than 10 days",
            HistoryPeriod::Month => "older than 30 days",
            HistoryPeriod::All => "all connection history",
        }
    }
}

impl FromStr for HistoryPeriod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "day" => Ok(HistoryPeriod::Day),
            "week" => Ok(HistoryPeriod::Week),
            "10days" => Ok(HistoryPeriod::TenDays),
            "month" => Ok(HistoryPeriod::Month),
            "all" => Ok(HistoryPeriod::All),
            other => Err(format!("unknown history period '{}'", other)),
        }
    }
}

impl fmt::Display for HistoryPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timestamp of the last destructive clear, stored as epoch milliseconds.
pub struct HistoryMarker {
    store: Arc<dyn KeyValueStore>,
}

impl HistoryMarker {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Reads the marker. An unparseable value is logged and treated as unset.
    pub fn load(&self) -> Result<Option<DateTime<Utc>>> {
        let Some(raw) = self.store.get(HISTORY_CLEARED_KEY)? else {
            return Ok(None);
        };

        match raw.trim().parse::<i64>() {
            Ok(ms) => Ok(Utc.timestamp_millis_opt(ms).single()),
            Err(e) => {
                warn!("Ignoring invalid {} value '{}': {}", HISTORY_CLEARED_KEY, raw, e);
                Ok(None)
            }
        }
    }

    pub fn mark(&self, at: DateTime<Utc>) -> Result<()> {
        self.store
            .set(HISTORY_CLEARED_KEY, &at.timestamp_millis().to_string())
    }
}

impl fmt::Debug for HistoryMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryMarker").finish_non_exhaustive()
    }
}
