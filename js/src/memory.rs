//! In-process stores

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{DurableStore, StoreError, StoreResult};

/// Store that persists nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

impl<S> DurableStore<S> for NullStore {
    fn load(&self) -> StoreResult<Option<S>> {
        Ok(None)
    }

    fn save(&self, _state: &S) -> StoreResult<()> {
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        Ok(())
    }

    fn describe(&self) -> String {
        "none".to_string()
    }
}

/// Store that keeps the serialized snapshot in memory
///
/// The snapshot goes through serde on every save/load, so a round trip
/// through this store exercises exactly what a disk store would.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: Mutex<Option<String>>,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves since creation
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Raw JSON of the last snapshot
    pub fn raw(&self) -> Option<String> {
        self.snapshot.lock().ok().and_then(|s| s.clone())
    }
}

impl<S> DurableStore<S> for MemoryStore
where
    S: Serialize + DeserializeOwned,
{
    fn load(&self) -> StoreResult<Option<S>> {
        let guard = self.snapshot.lock().map_err(|e| StoreError::Lock(e.to_string()))?;
        match guard.as_deref() {
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }

    fn save(&self, state: &S) -> StoreResult<()> {
        let json = serde_json::to_string(state)?;
        let mut guard = self.snapshot.lock().map_err(|e| StoreError::Lock(e.to_string()))?;
        *guard = Some(json);
        let count = self.saves.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(count, "MemoryStore::save: snapshot replaced");
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        let mut guard = self.snapshot.lock().map_err(|e| StoreError::Lock(e.to_string()))?;
        *guard = None;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_empty() {
        let store = MemoryStore::new();
        let loaded: Option<Vec<u32>> = store.load().unwrap();
        assert!(loaded.is_none());
        assert_eq!(store.save_count(), 0);
    }

    #[test]
    fn test_memory_store_round_trip_and_count() {
        let store = MemoryStore::new();
        store.save(&vec![1u32, 2, 3]).unwrap();
        store.save(&vec![4u32]).unwrap();

        let loaded: Option<Vec<u32>> = store.load().unwrap();
        assert_eq!(loaded, Some(vec![4]));
        assert_eq!(store.save_count(), 2);
        assert_eq!(store.raw().as_deref(), Some("[4]"));
    }

    #[test]
    fn test_memory_store_clear() {
        let store = MemoryStore::new();
        DurableStore::<Vec<u32>>::save(&store, &vec![1]).unwrap();
        DurableStore::<Vec<u32>>::clear(&store).unwrap();
        let loaded: Option<Vec<u32>> = store.load().unwrap();
        assert!(loaded.is_none());
    }
}
