//! Column sort over connection records.

use crate::types::ConnectionRecord;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Sortable table column. Names follow the table header keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortColumn {
    Source,
    #[serde(rename = "sport")]
    SourcePort,
    Destination,
    #[serde(rename = "dport")]
    DestinationPort,
    Protocol,
    Service,
    Bytes,
    Packets,
}

impl SortColumn {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortColumn::Source => "source",
            SortColumn::SourcePort => "sport",
            SortColumn::Destination => "destination",
            SortColumn::DestinationPort => "dport",
            SortColumn::Protocol => "protocol",
            SortColumn::Service => "service",
            SortColumn::Bytes => "bytes",
            SortColumn::Packets => "packets",
        }
    }

    /// Ascending comparison of the column value of two records.
    pub fn compare(&self, a: &ConnectionRecord, b: &ConnectionRecord) -> Ordering {
        match self {
            SortColumn::Source => a.src_addr.cmp(&b.src_addr),
            SortColumn::SourcePort => a.src_port.cmp(&b.src_port),
            SortColumn::Destination => a.dst_addr.cmp(&b.dst_addr),
            SortColumn::DestinationPort => a.dst_port.cmp(&b.dst_port),
            SortColumn::Protocol => a.protocol.as_str().cmp(b.protocol.as_str()),
            SortColumn::Service => a.service.cmp(&b.service),
            SortColumn::Bytes => a.bytes.cmp(&b.bytes),
            SortColumn::Packets => a.packets.cmp(&b.packets),
        }
    }
}

impl FromStr for SortColumn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "source" | "src" => Ok(SortColumn::Source),
            "sport" => Ok(SortColumn::SourcePort),
            "destination" | "dst" => Ok(SortColumn::Destination),
            "dport" => Ok(SortColumn::DestinationPort),
            "protocol" => Ok(SortColumn::Protocol),
            "service" => Ok(SortColumn::Service),
            "bytes" => Ok(SortColumn::Bytes),
            "packets" => Ok(SortColumn::Packets),
            other => Err(format!("unknown sort column '{}'", other)),
        }
    }
}

impl fmt::Display for SortColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn reversed(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

/// Active sort column and direction. Defaults to bytes, descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub column: SortColumn,
    pub direction: SortDirection,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self {
            column: SortColumn::Bytes,
            direction: SortDirection::Desc,
        }
    }
}

impl SortSpec {
    pub fn new(column: SortColumn, direction: SortDirection) -> Self {
        Self { column, direction }
    }

    /// Header-click behavior: the same column flips direction, a new
    /// column starts ascending.
    pub fn toggled(self, column: SortColumn) -> Self {
        if self.column == column {
            Self::new(column, self.direction.reversed())
        } else {
            Self::new(column, SortDirection::Asc)
        }
    }

    pub fn compare(&self, a: &ConnectionRecord, b: &ConnectionRecord) -> Ordering {
        let ord = self.column.compare(a, b);
        match self.direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    }

    /// Stable in-place sort; equal keys keep their current relative order.
    pub fn sort(&self, records: &mut [ConnectionRecord]) {
        records.sort_by(|a, b| self.compare(a, b));
    }
}
