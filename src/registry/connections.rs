//! # Connection Registry
//!
//! Holds the latest connection snapshot and the view derived from it.
//!
//! ## Consistency
//! - **Snapshots**: every ingest swaps in a new `Arc<Vec<_>>`; readers keep
//!   whatever snapshot they cloned and never observe a half-applied poll
//! - **View**: recomputed under the same write lock whenever records, filter,
//!   sort or (for favorites-only views) favorites change
//! - **Lock order**: registry state first, then the favorite set

use super::favorites::FavoriteSet;
use super::filter::FilterSpec;
use super::history::{HistoryMarker, HistoryPeriod};
use super::page::{paginate, Page};
use super::sort::{SortColumn, SortSpec};
use crate::error::Result;
use crate::store::KeyValueStore;
use crate::types::{ConnectionId, ConnectionRecord};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Point-in-time counters for status lines.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub total: usize,
    pub visible: usize,
    pub active: usize,
    pub favorites: usize,
    pub active_filters: usize,
    pub generation: u64,
    pub last_ingest_at: Option<DateTime<Utc>>,
    pub last_cleared: Option<DateTime<Utc>>,
}

struct RegistryInner {
    records: Arc<Vec<ConnectionRecord>>,
    view: Arc<Vec<ConnectionRecord>>,
    filter: FilterSpec,
    sort: SortSpec,
    generation: u64,
    last_ingest_at: Option<DateTime<Utc>>,
    last_cleared: Option<DateTime<Utc>>,
}

impl RegistryInner {
    fn rebuild_view(&mut self, favorites: &HashSet<ConnectionId>) {
        let mut view: Vec<ConnectionRecord> = self
            .records
            .iter()
            .filter(|r| self.filter.matches(r, favorites))
            .cloned()
            .collect();
        self.sort.sort(&mut view);
        self.view = Arc::new(view);
    }
}

pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
    favorites: FavoriteSet,
    marker: HistoryMarker,
}

impl ConnectionRegistry {
    /// Creates an empty registry backed by `store` for favorites and the
    /// history marker.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let favorites = FavoriteSet::load(store.clone())?;
        let marker = HistoryMarker::new(store);
        let last_cleared = marker.load()?;

        Ok(Self {
            inner: RwLock::new(RegistryInner {
                records: Arc::new(Vec::new()),
                view: Arc::new(Vec::new()),
                filter: FilterSpec::default(),
                sort: SortSpec::default(),
                generation: 0,
                last_ingest_at: None,
                last_cleared,
            }),
            favorites,
            marker,
        })
    }

    // ============================================================================================
    // INGESTION
    // ============================================================================================

    /// Replaces the whole record set with `records`.
    pub fn ingest(&self, records: Vec<ConnectionRecord>) {
        let records: Vec<ConnectionRecord> =
            records.into_iter().map(ConnectionRecord::normalize).collect();
        let count = records.len();

        let mut inner = self.inner.write();
        inner.records = Arc::new(records);
        inner.generation += 1;
        inner.last_ingest_at = Some(Utc::now());
        inner.rebuild_view(&self.favorites.read());

        debug!(
            "Ingested {} connections (generation {}, {} visible)",
            count,
            inner.generation,
            inner.view.len()
        );
    }

    /// Picks up favorites and the clear marker written to the store by
    /// another process. Rebuilds a favorites-only view when membership moved.
    pub fn reload_persisted(&self) -> Result<()> {
        let mut inner = self.inner.write();

        if self.favorites.reload()? && inner.filter.favorites_only {
            inner.rebuild_view(&self.favorites.read());
        }
        if let Some(at) = self.marker.load()? {
            inner.last_cleared = Some(at);
        }
        Ok(())
    }

    // ============================================================================================
    // VIEW
    // ============================================================================================

    /// Sets the filter and returns the number of visible records.
    pub fn apply_filter(&self, spec: FilterSpec) -> usize {
        let mut inner = self.inner.write();
        inner.filter = spec;
        inner.rebuild_view(&self.favorites.read());
        inner.view.len()
    }

    pub fn apply_sort(&self, spec: SortSpec) {
        let mut inner = self.inner.write();
        inner.sort = spec;
        inner.rebuild_view(&self.favorites.read());
    }

    /// Header-click sort: flips direction on the active column, otherwise
    /// switches to `column` ascending. Returns the new sort.
    pub fn toggle_sort(&self, column: SortColumn) -> SortSpec {
        let mut inner = self.inner.write();
        inner.sort = inner.sort.toggled(column);
        inner.rebuild_view(&self.favorites.read());
        inner.sort
    }

    pub fn filter(&self) -> FilterSpec {
        self.inner.read().filter.clone()
    }

    pub fn sort(&self) -> SortSpec {
        self.inner.read().sort
    }

    /// Filtered and sorted records.
    pub fn view(&self) -> Arc<Vec<ConnectionRecord>> {
        self.inner.read().view.clone()
    }

    /// Unfiltered records of the latest snapshot, in engine order.
    pub fn snapshot(&self) -> Arc<Vec<ConnectionRecord>> {
        self.inner.read().records.clone()
    }

    /// Page `number` (1-based) of the current view.
    pub fn page(&self, number: usize, page_size: usize) -> Page {
        let view = self.view();
        paginate(&view, number, page_size)
    }

    /// Looks up a record of the latest snapshot, visible or not.
    pub fn record(&self, id: &ConnectionId) -> Option<ConnectionRecord> {
        self.inner
            .read()
            .records
            .iter()
            .find(|r| &r.id == id)
            .cloned()
    }

    // ============================================================================================
    // FAVORITES
    // ============================================================================================

    /// Flips favorite membership of `id`, persisting it before returning.
    pub fn toggle_favorite(&self, id: &ConnectionId) -> Result<bool> {
        let mut inner = self.inner.write();
        let now_favorite = self.favorites.toggle(id)?;

        if inner.filter.favorites_only {
            inner.rebuild_view(&self.favorites.read());
        }

        debug!(
            "Connection {} {}",
            id,
            if now_favorite { "favorited" } else { "unfavorited" }
        );
        Ok(now_favorite)
    }

    pub fn is_favorite(&self, id: &ConnectionId) -> bool {
        self.favorites.contains(id)
    }

    pub fn favorites(&self) -> &FavoriteSet {
        &self.favorites
    }

    // ============================================================================================
    // HISTORY
    // ============================================================================================

    /// Removes every record first seen before `cutoff` and returns how many
    /// were removed. The clear marker is set to now even when nothing matched.
    pub fn clear_history(&self, cutoff: DateTime<Utc>) -> usize {
        let mut inner = self.inner.write();

        let before = inner.records.len();
        let kept: Vec<ConnectionRecord> = inner
            .records
            .iter()
            .filter(|r| r.first_seen >= cutoff)
            .cloned()
            .collect();
        let removed = before - kept.len();

        if removed > 0 {
            inner.records = Arc::new(kept);
            inner.rebuild_view(&self.favorites.read());
        }

        let now = Utc::now();
        inner.last_cleared = Some(now);
        if let Err(e) = self.marker.mark(now) {
            warn!("Failed to persist history clear marker: {}", e);
        }

        info!("Cleared {} connections first seen before {}", removed, cutoff);
        removed
    }

    /// Sets the clear marker to now without touching the record set.
    pub fn mark_cleared(&self) -> Result<DateTime<Utc>> {
        let mut inner = self.inner.write();
        let now = Utc::now();
        self.marker.mark(now)?;
        inner.last_cleared = Some(now);
        Ok(now)
    }

    pub fn clear_period(&self, period: HistoryPeriod) -> usize {
        self.clear_history(period.cutoff(Utc::now()))
    }

    pub fn last_cleared(&self) -> Option<DateTime<Utc>> {
        self.inner.read().last_cleared
    }

    pub fn stats(&self) -> RegistryStats {
        let inner = self.inner.read();
        RegistryStats {
            total: inner.records.len(),
            visible: inner.view.len(),
            active: inner.records.iter().filter(|r| r.active).count(),
            favorites: self.favorites.len(),
            active_filters: inner.filter.active_count(),
            generation: inner.generation,
            last_ingest_at: inner.last_ingest_at,
            last_cleared: inner.last_cleared,
        }
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("ConnectionRegistry")
            .field("records", &inner.records.len())
            .field("visible", &inner.view.len())
            .field("generation", &inner.generation)
            .field("favorites", &self.favorites)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SortDirection;
    use crate::store::{MemoryStore, HISTORY_CLEARED_KEY};
    use crate::types::Protocol;
    use chrono::{Duration, TimeZone};

    fn record(id: i64, bytes: u64, first_seen_ms: i64) -> ConnectionRecord {
        let seen = Utc.timestamp_millis_opt(first_seen_ms).unwrap();
        ConnectionRecord {
            id: ConnectionId::Num(id),
            src_addr: "192.168.1.10".into(),
            src_port: 40000,
            dst_addr: format!("10.0.0.{}", id),
            dst_port: 443,
            protocol: Protocol::Tcp,
            service: "HTTPS".into(),
            bytes,
            packets: 1,
            domain: None,
            country: None,
            asn: None,
            first_seen: seen,
            last_seen: seen,
            active: id % 2 == 0,
        }
    }

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::new(Arc::new(MemoryStore::new())).unwrap()
    }

    #[test]
    fn test_ingest_replaces_snapshot() {
        let reg = registry();
        reg.ingest(vec![record(1, 10, 0), record(2, 20, 0)]);
        let first = reg.snapshot();

        reg.ingest(vec![record(3, 30, 0)]);
        assert_eq!(first.len(), 2);
        assert_eq!(reg.snapshot().len(), 1);
        assert!(reg.record(&ConnectionId::Num(1)).is_none());
        assert_eq!(reg.stats().generation, 2);
    }

    #[test]
    fn test_view_sorted_by_bytes_desc() {
        let reg = registry();
        reg.ingest(vec![record(1, 100, 0), record(2, 5_000_000, 0), record(3, 0, 0)]);
        let bytes: Vec<u64> = reg.view().iter().map(|r| r.bytes).collect();
        assert_eq!(bytes, vec![5_000_000, 100, 0]);
    }

    #[test]
    fn test_filter_does_not_touch_records() {
        let reg = registry();
        reg.ingest(vec![record(1, 1, 0), record(2, 2, 0)]);
        let visible = reg.apply_filter(FilterSpec::default().with_host("10.0.0.1"));
        assert_eq!(visible, 1);
        assert_eq!(reg.snapshot().len(), 2);
        assert_eq!(reg.stats().active_filters, 1);
    }

    #[test]
    fn test_favorites_only_view_follows_toggles() {
        let reg = registry();
        reg.ingest(vec![record(1, 1, 0), record(2, 2, 0)]);
        reg.apply_filter(FilterSpec::default().favorites_only());
        assert!(reg.view().is_empty());

        reg.toggle_favorite(&ConnectionId::Num(2)).unwrap();
        assert_eq!(reg.view().len(), 1);
        assert!(reg.is_favorite(&ConnectionId::Num(2)));

        reg.toggle_favorite(&ConnectionId::Num(2)).unwrap();
        assert!(reg.view().is_empty());
    }

    #[test]
    fn test_favorite_survives_missing_snapshot() {
        let reg = registry();
        reg.toggle_favorite(&ConnectionId::Num(9)).unwrap();
        reg.ingest(vec![record(1, 1, 0)]);
        assert!(reg.is_favorite(&ConnectionId::Num(9)));

        reg.apply_filter(FilterSpec::default().favorites_only());
        reg.ingest(vec![record(9, 1, 0)]);
        assert_eq!(reg.view().len(), 1);
    }

    #[test]
    fn test_clear_history_sets_marker() {
        let store = Arc::new(MemoryStore::new());
        let reg = ConnectionRegistry::new(store.clone()).unwrap();
        let now = Utc::now();
        let old = (now - Duration::days(3)).timestamp_millis();
        let fresh = now.timestamp_millis();
        reg.ingest(vec![record(1, 1, old), record(2, 2, fresh), record(3, 3, old)]);

        assert_eq!(reg.clear_period(HistoryPeriod::Day), 2);
        assert_eq!(reg.snapshot().len(), 1);
        assert_eq!(reg.view().len(), 1);
        assert!(reg.last_cleared().is_some());
        assert!(store.get(HISTORY_CLEARED_KEY).unwrap().is_some());

        let reopened = ConnectionRegistry::new(store).unwrap();
        assert_eq!(
            reopened.last_cleared().map(|t| t.timestamp_millis()),
            reg.last_cleared().map(|t| t.timestamp_millis())
        );
    }

    #[test]
    fn test_reload_persisted_follows_other_writers() {
        let store = Arc::new(MemoryStore::new());
        let daemon = ConnectionRegistry::new(store.clone()).unwrap();
        daemon.ingest(vec![record(1, 1, 0), record(2, 2, 0)]);
        daemon.apply_filter(FilterSpec::default().favorites_only());

        let viewer = ConnectionRegistry::new(store).unwrap();
        viewer.toggle_favorite(&ConnectionId::Num(2)).unwrap();
        let cleared_at = viewer.mark_cleared().unwrap();

        assert!(daemon.view().is_empty());
        assert!(daemon.last_cleared().is_none());

        daemon.reload_persisted().unwrap();
        assert_eq!(daemon.view().len(), 1);
        assert_eq!(daemon.stats().favorites, 1);
        assert_eq!(
            daemon.last_cleared().map(|t| t.timestamp_millis()),
            Some(cleared_at.timestamp_millis())
        );
        assert_eq!(daemon.snapshot().len(), 2);
    }

    #[test]
    fn test_mark_cleared_keeps_records() {
        let reg = registry();
        reg.ingest(vec![record(1, 1, 0)]);
        let at = reg.mark_cleared().unwrap();
        assert_eq!(reg.last_cleared(), Some(at));
        assert_eq!(reg.snapshot().len(), 1);
    }

    #[test]
    fn test_toggle_sort() {
        let reg = registry();
        reg.ingest(vec![record(1, 100, 0), record(2, 5, 0)]);
        let spec = reg.toggle_sort(SortColumn::Bytes);
        assert_eq!(spec.direction, SortDirection::Asc);
        assert_eq!(reg.view()[0].bytes, 5);
    }

    #[test]
    fn test_stats_counts_active() {
        let reg = registry();
        reg.ingest(vec![record(1, 1, 0), record(2, 1, 0), record(4, 1, 0)]);
        let stats = reg.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.active, 2);
        assert!(stats.last_ingest_at.is_some());
    }
}
