//! Persisted set of favorited connection ids.
//!
//! Favorites are keyed by id only and outlive any snapshot: an id that is
//! missing from the latest poll stays favorited and shows up again when the
//! engine reports it.

use crate::error::{MonitorError, Result};
use crate::store::{KeyValueStore, FAVORITES_KEY};
use crate::types::ConnectionId;
use log::{debug, warn};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

pub struct FavoriteSet {
    ids: RwLock<HashSet<ConnectionId>>,
    store: Arc<dyn KeyValueStore>,
}

impl FavoriteSet {
    /// Loads the set from `store`. A corrupt stored list is logged and
    /// replaced by an empty set; store I/O errors are returned.
    pub fn load(store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let ids = read_stored(store.as_ref())?.unwrap_or_default();

        debug!("Loaded {} favorites", ids.len());

        Ok(Self {
            ids: RwLock::new(ids),
            store,
        })
    }

    /// Re-reads the stored list so toggles made by another process (the
    /// viewer CLI) show up. Returns whether membership changed. A corrupt
    /// stored list keeps the current membership.
    pub fn reload(&self) -> Result<bool> {
        let Some(stored) = read_stored(self.store.as_ref())? else {
            return Ok(false);
        };

        let mut ids = self.ids.write();
        if *ids == stored {
            return Ok(false);
        }
        debug!("Favorites changed in store ({} -> {})", ids.len(), stored.len());
        *ids = stored;
        Ok(true)
    }

    /// Flips membership of `id` and returns the new state.
    ///
    /// The updated list is written to the store before the in-memory set
    /// changes, so a failed write leaves membership untouched.
    pub fn toggle(&self, id: &ConnectionId) -> Result<bool> {
        let mut ids = self.ids.write();

        let mut next = ids.clone();
        let now_favorite = if next.remove(id) {
            false
        } else {
            next.insert(id.clone());
            true
        };

        self.persist(&next)?;
        *ids = next;

        Ok(now_favorite)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.ids.read().contains(id)
    }

    /// Copy of the current membership.
    pub fn snapshot(&self) -> HashSet<ConnectionId> {
        self.ids.read().clone()
    }

    pub fn len(&self) -> usize {
        self.ids.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.read().is_empty()
    }

    pub(crate) fn read(&self) -> parking_lot::RwLockReadGuard<'_, HashSet<ConnectionId>> {
        self.ids.read()
    }

    fn persist(&self, ids: &HashSet<ConnectionId>) -> Result<()> {
        let mut list: Vec<&ConnectionId> = ids.iter().collect();
        list.sort();
        let json = serde_json::to_string(&list).map_err(|source| MonitorError::StoredValue {
            key: FAVORITES_KEY.to_string(),
            source,
        })?;
        self.store.set(FAVORITES_KEY, &json)
    }
}

/// `None` when the stored list is unreadable. A missing key reads as empty.
fn read_stored(store: &dyn KeyValueStore) -> Result<Option<HashSet<ConnectionId>>> {
    let Some(raw) = store.get(FAVORITES_KEY)? else {
        return Ok(Some(HashSet::new()));
    };
    match serde_json::from_str::<Vec<ConnectionId>>(&raw) {
        Ok(list) => Ok(Some(list.into_iter().collect())),
        Err(e) => {
            warn!("Discarding unreadable favorites list: {}", e);
            Ok(None)
        }
    }
}

impl fmt::Debug for FavoriteSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FavoriteSet")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    struct FailingStore;

    impl KeyValueStore for FailingStore {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            Ok(None)
        }

        fn set(&self, _key: &str, _value: &str) -> Result<()> {
            Err(MonitorError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            )))
        }

        fn remove(&self, _key: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_toggle_twice_restores_membership() {
        let favorites = FavoriteSet::load(Arc::new(MemoryStore::new())).unwrap();
        let id = ConnectionId::Num(42);

        assert!(favorites.toggle(&id).unwrap());
        assert!(favorites.contains(&id));
        assert!(!favorites.toggle(&id).unwrap());
        assert!(!favorites.contains(&id));
    }

    #[test]
    fn test_persisted_across_loads() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let favorites = FavoriteSet::load(store.clone()).unwrap();
        favorites.toggle(&ConnectionId::Num(3)).unwrap();
        favorites.toggle(&ConnectionId::Text("flow-a".into())).unwrap();

        assert_eq!(
            store.get(FAVORITES_KEY).unwrap().as_deref(),
            Some(r#"[3,"flow-a"]"#)
        );

        let reloaded = FavoriteSet::load(store).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains(&ConnectionId::Num(3)));
    }

    #[test]
    fn test_corrupt_list_loads_empty() {
        let store = Arc::new(MemoryStore::new());
        store.set(FAVORITES_KEY, "{not json").unwrap();
        let favorites = FavoriteSet::load(store).unwrap();
        assert!(favorites.is_empty());
    }

    #[test]
    fn test_reload_sees_toggles_from_another_handle() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let daemon = FavoriteSet::load(store.clone()).unwrap();
        let viewer = FavoriteSet::load(store.clone()).unwrap();

        viewer.toggle(&ConnectionId::Num(7)).unwrap();
        assert!(!daemon.contains(&ConnectionId::Num(7)));
        assert!(daemon.reload().unwrap());
        assert!(daemon.contains(&ConnectionId::Num(7)));
        assert!(!daemon.reload().unwrap());

        store.set(FAVORITES_KEY, "garbage").unwrap();
        assert!(!daemon.reload().unwrap());
        assert!(daemon.contains(&ConnectionId::Num(7)));
    }

    #[test]
    fn test_failed_write_keeps_membership() {
        let favorites = FavoriteSet::load(Arc::new(FailingStore)).unwrap();
        assert!(favorites.toggle(&ConnectionId::Num(1)).is_err());
        assert!(!favorites.contains(&ConnectionId::Num(1)));
    }
}
