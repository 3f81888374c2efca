//! SQLite key/value snapshot store

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::{DurableStore, StoreError, StoreResult};

const SNAPSHOT_KEY: &str = "state";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS snapshots (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);
";

/// Snapshot store backed by a single SQLite table
///
/// Each save is one upsert, which SQLite applies atomically.
pub struct SqliteStore {
    path: PathBuf,
    conn: Mutex<Connection>,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

impl SqliteStore {
    /// Open or create the database at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch(SCHEMA)?;
        info!(path = %path.display(), "Opened SQLite store");
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (tests)
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
        })
    }

    /// Unix ms of the last save, if any
    pub fn updated_at(&self) -> StoreResult<Option<i64>> {
        let conn = self.conn.lock().map_err(|e| StoreError::Lock(e.to_string()))?;
        let ts = conn
            .query_row(
                "SELECT updated_at FROM snapshots WHERE key = ?1",
                [SNAPSHOT_KEY],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(ts)
    }
}

impl<S> DurableStore<S> for SqliteStore
where
    S: Serialize + DeserializeOwned,
{
    fn load(&self) -> StoreResult<Option<S>> {
        debug!(path = ?self.path, "SqliteStore::load: called");
        let conn = self.conn.lock().map_err(|e| StoreError::Lock(e.to_string()))?;
        let value = conn
            .query_row("SELECT value FROM snapshots WHERE key = ?1", [SNAPSHOT_KEY], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;

        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn save(&self, state: &S) -> StoreResult<()> {
        let json = serde_json::to_string(state)?;
        let conn = self.conn.lock().map_err(|e| StoreError::Lock(e.to_string()))?;
        conn.execute(
            "INSERT INTO snapshots (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![SNAPSHOT_KEY, json, now_ms()],
        )?;
        debug!(bytes = json.len(), "SqliteStore::save: snapshot upserted");
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        let conn = self.conn.lock().map_err(|e| StoreError::Lock(e.to_string()))?;
        conn.execute("DELETE FROM snapshots WHERE key = ?1", [SNAPSHOT_KEY])?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sqlite_store_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let empty: Option<Vec<u32>> = store.load().unwrap();
        assert!(empty.is_none());
        assert_eq!(store.updated_at().unwrap(), None);

        store.save(&vec![5u32, 6]).unwrap();
        store.save(&vec![7u32]).unwrap();
        let loaded: Option<Vec<u32>> = store.load().unwrap();
        assert_eq!(loaded, Some(vec![7]));
        assert!(store.updated_at().unwrap().is_some());
    }

    #[test]
    fn test_sqlite_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.save(&vec!["queued".to_string()]).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        let loaded: Option<Vec<String>> = store.load().unwrap();
        assert_eq!(loaded, Some(vec!["queued".to_string()]));
    }

    #[test]
    fn test_sqlite_store_clear() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.save(&vec![1u32]).unwrap();
        DurableStore::<Vec<u32>>::clear(&store).unwrap();
        let loaded: Option<Vec<u32>> = store.load().unwrap();
        assert!(loaded.is_none());
    }
}
