//! Filter predicate over connection records.

use crate::types::{ConnectionId, ConnectionRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Protocol class that also matches on the service label.
pub const HTTP_CLASS: &str = "http";

/// Protocol class meaning "no constraint".
pub const ALL_CLASS: &str = "all";

/// User-chosen filter constraints. Every unset field means "no constraint".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSpec {
    /// Case-sensitive substring of source address, destination address or domain
    #[serde(default)]
    pub host_substring: Option<String>,
    #[serde(default)]
    pub favorites_only: bool,
    /// Exact region code
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub asn_substring: Option<String>,
    /// Protocol name, `"http"` for HTTP/HTTPS services, `"all"` for none
    #[serde(default)]
    pub protocol_class: Option<String>,
}

fn constraint(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl FilterSpec {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host_substring = Some(host.into());
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn with_asn(mut self, asn: impl Into<String>) -> Self {
        self.asn_substring = Some(asn.into());
        self
    }

    pub fn with_protocol(mut self, class: impl Into<String>) -> Self {
        self.protocol_class = Some(class.into());
        self
    }

    pub fn favorites_only(mut self) -> Self {
        self.favorites_only = true;
        self
    }

    fn protocol_constraint(&self) -> Option<&str> {
        constraint(&self.protocol_class).filter(|c| !c.eq_ignore_ascii_case(ALL_CLASS))
    }

    /// Number of constraints that actually restrict the view.
    pub fn active_count(&self) -> usize {
        [
            constraint(&self.host_substring).is_some(),
            self.favorites_only,
            constraint(&self.country).is_some(),
            constraint(&self.asn_substring).is_some(),
            self.protocol_constraint().is_some(),
        ]
        .iter()
        .filter(|active| **active)
        .count()
    }

    pub fn is_empty(&self) -> bool {
        self.active_count() == 0
    }

    /// Returns true when `record` satisfies every active constraint.
    pub fn matches(&self, record: &ConnectionRecord, favorites: &HashSet<ConnectionId>) -> bool {
        if let Some(host) = constraint(&self.host_substring) {
            let in_domain = record
                .domain
                .as_deref()
                .map(|d| d.contains(host))
                .unwrap_or(false);
            if !(record.src_addr.contains(host) || record.dst_addr.contains(host) || in_domain) {
                return false;
            }
        }

        if self.favorites_only && !favorites.contains(&record.id) {
            return false;
        }

        if let Some(country) = constraint(&self.country) {
            if record.country.as_deref() != Some(country) {
                return false;
            }
        }

        if let Some(asn) = constraint(&self.asn_substring) {
            if !record.asn.as_deref().map(|a| a.contains(asn)).unwrap_or(false) {
                return false;
            }
        }

        if let Some(class) = self.protocol_constraint() {
            let protocol_match = record.protocol.as_str().eq_ignore_ascii_case(class);
            let http_match = class.eq_ignore_ascii_case(HTTP_CLASS)
                && (record.service == "HTTP" || record.service == "HTTPS");
            if !(protocol_match || http_match) {
                return false;
            }
        }

        true
    }
}
