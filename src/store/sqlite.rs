//! SQLite-backed key-value store.
//!
//! A single `kv` table keyed by name. Every `set` is committed immediately so
//! a favorite toggle survives a crash right after it returns.

use super::KeyValueStore;
use crate::error::Result;
use crate::types::now_ms;
use log::debug;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};

pub struct SqliteStore {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .finish()
    }
}

impl SqliteStore {
    /// Open or create the store at `path`, creating parent directories as needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at_ms INTEGER NOT NULL
            )",
            [],
        )?;

        debug!("Opened key-value store at {}", path.display());

        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value, updated_at_ms) VALUES (?1, ?2, ?3)",
            params![key, value, now_ms() as i64],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_survive_reopen() -> Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let path = tmp_dir.path().join("nested").join("state.db");

        {
            let store = SqliteStore::open(&path)?;
            store.set("connectionFavorites", "[1,2,3]")?;
            store.set("lastHistoryCleared", "1700000000000")?;
        }

        let store = SqliteStore::open(&path)?;
        assert_eq!(
            store.get("connectionFavorites")?.as_deref(),
            Some("[1,2,3]")
        );
        assert_eq!(
            store.get("lastHistoryCleared")?.as_deref(),
            Some("1700000000000")
        );
        assert!(store.get("missing")?.is_none());

        Ok(())
    }

    #[test]
    fn test_set_replaces_and_remove_deletes() -> Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let store = SqliteStore::open(tmp_dir.path().join("state.db"))?;

        store.set("k", "a")?;
        store.set("k", "b")?;
        assert_eq!(store.get("k")?.as_deref(), Some("b"));

        store.remove("k")?;
        assert!(store.get("k")?.is_none());

        Ok(())
    }
}
