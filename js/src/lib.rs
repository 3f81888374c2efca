//! JobStore - pluggable durable snapshot storage
//!
//! A store persists one value of some serializable state type `S` and hands
//! it back on the next start. It knows nothing about what `S` contains; the
//! caller decides what a snapshot means.
//!
//! # Backends
//!
//! ```text
//! NullStore     - discards every write (tests, ephemeral queues)
//! MemoryStore   - serialized snapshot kept in memory
//! FileStore     - state.json, replaced atomically via temp file + rename
//! JournalStore  - state.jsonl, one snapshot per line, compacted periodically
//! SqliteStore   - state.db, single key/value table
//! ```
//!
//! Each snapshot replaces the whole store, so a process that writes one
//! should first take an [`OwnerLock`] on its path.
//!
//! # Example
//!
//! ```ignore
//! use jobstore::{DurableStore, FileStore};
//!
//! let store = FileStore::open(".jobdaemon/state.json")?;
//! store.save(&my_state)?;
//! let restored: Option<MyState> = store.load()?;
//! ```

mod error;
mod file;
mod journal;
mod memory;
mod owner;
mod sqlite;
mod traits;

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub use error::{StoreError, StoreResult};
pub use file::FileStore;
pub use journal::JournalStore;
pub use memory::{MemoryStore, NullStore};
pub use owner::{OwnerLock, owner_path};
pub use sqlite::SqliteStore;
pub use traits::DurableStore;

/// Number of journal appends before the journal is rewritten down to one line
pub const DEFAULT_COMPACT_AFTER: usize = 256;

/// Which backend to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    None,
    Memory,
    #[default]
    File,
    Journal,
    Sqlite,
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Memory => write!(f, "memory"),
            Self::File => write!(f, "file"),
            Self::Journal => write!(f, "journal"),
            Self::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl std::str::FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            "journal" => Ok(Self::Journal),
            "sqlite" => Ok(Self::Sqlite),
            _ => Err(format!("Unknown store kind: {}", s)),
        }
    }
}

/// Open a store of the given kind
///
/// `path` is required for the file-backed kinds and ignored otherwise.
pub fn open_store<S>(kind: StoreKind, path: Option<&Path>) -> StoreResult<Box<dyn DurableStore<S>>>
where
    S: Serialize + DeserializeOwned + 'static,
{
    tracing::debug!(%kind, ?path, "open_store: called");
    let require_path = || path.ok_or(StoreError::MissingPath(kind));

    let store: Box<dyn DurableStore<S>> = match kind {
        StoreKind::None => Box::new(NullStore),
        StoreKind::Memory => Box::new(MemoryStore::new()),
        StoreKind::File => Box::new(FileStore::open(require_path()?)?),
        StoreKind::Journal => Box::new(JournalStore::open(require_path()?, DEFAULT_COMPACT_AFTER)?),
        StoreKind::Sqlite => Box::new(SqliteStore::open(require_path()?)?),
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    type State = BTreeMap<String, u32>;

    #[test]
    fn test_store_kind_parse() {
        assert_eq!("sqlite".parse::<StoreKind>().unwrap(), StoreKind::Sqlite);
        assert_eq!("FILE".parse::<StoreKind>().unwrap(), StoreKind::File);
        assert!("redis".parse::<StoreKind>().is_err());
    }

    #[test]
    fn test_store_kind_serde() {
        let kind: StoreKind = serde_json::from_str("\"journal\"").unwrap();
        assert_eq!(kind, StoreKind::Journal);
        assert_eq!(serde_json::to_string(&StoreKind::None).unwrap(), "\"none\"");
    }

    #[test]
    fn test_open_store_requires_path() {
        let result = open_store::<State>(StoreKind::File, None);
        assert!(matches!(result, Err(StoreError::MissingPath(StoreKind::File))));
    }

    #[test]
    fn test_open_store_every_kind_round_trips() {
        let dir = tempdir().unwrap();
        let mut state = State::new();
        state.insert("queued".to_string(), 3);

        for (kind, file) in [
            (StoreKind::Memory, "unused"),
            (StoreKind::File, "state.json"),
            (StoreKind::Journal, "state.jsonl"),
            (StoreKind::Sqlite, "state.db"),
        ] {
            let path = dir.path().join(file);
            let store = open_store::<State>(kind, Some(&path)).unwrap();
            store.save(&state).unwrap();
            assert_eq!(store.load().unwrap(), Some(state.clone()), "kind {}", kind);
        }
    }

    #[test]
    fn test_null_store_forgets() {
        let store = open_store::<State>(StoreKind::None, None).unwrap();
        store.save(&State::new()).unwrap();
        assert_eq!(store.load().unwrap(), None);
    }
}
