//! Persisted client state.
//!
//! The pipeline keeps exactly two values across restarts: the favorite set and
//! the last history-clear marker. Both live under well-known keys of a plain
//! string key-value store:
//! - **SQLite**: on-disk store used by the binaries
//! - **Memory**: ephemeral store for tests and `--no-persist` runs

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Result;

/// Key holding the JSON list of favorited connection ids.
pub const FAVORITES_KEY: &str = "connectionFavorites";

/// Key holding the epoch-millisecond timestamp of the last history clear.
pub const HISTORY_CLEARED_KEY: &str = "lastHistoryCleared";

/// Opaque string key-value storage.
pub trait KeyValueStore: Send + Sync {
    /// Returns the stored value, or `None` if the key was never written.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Deletes `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}
