//! Single-file JSON snapshot store

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::{DurableStore, StoreResult};

/// Snapshot store backed by one JSON file
///
/// Writes go to `{path}.tmp` first and are renamed over the target, so a
/// crash mid-write leaves the previous snapshot intact. An advisory lock on
/// `{path}.lock` keeps two processes from interleaving writes.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
}

/// Holds the advisory lock until dropped
struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!(error = %e, "LockGuard::drop: unlock failed");
        }
    }
}

impl FileStore {
    /// Open (or prepare) a file store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        debug!(?path, "FileStore::open: opened");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    }

    fn lock(&self) -> StoreResult<LockGuard> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.sibling(".lock"))?;
        FileExt::lock_exclusive(&file)?;
        Ok(LockGuard { file })
    }
}

impl<S> DurableStore<S> for FileStore
where
    S: Serialize + DeserializeOwned,
{
    fn load(&self) -> StoreResult<Option<S>> {
        debug!(path = ?self.path, "FileStore::load: called");
        if !self.path.exists() {
            debug!("FileStore::load: no snapshot on disk");
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path)?;
        let state = serde_json::from_str(&content)?;
        info!(path = %self.path.display(), bytes = content.len(), "Loaded snapshot");
        Ok(Some(state))
    }

    fn save(&self, state: &S) -> StoreResult<()> {
        let json = serde_json::to_vec_pretty(state)?;
        let _guard = self.lock()?;

        let tmp = self.sibling(".tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        debug!(path = ?self.path, bytes = json.len(), "FileStore::save: snapshot written");
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        let _guard = self.lock()?;
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_store_missing_file_is_none() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path().join("state.json")).unwrap();
        let loaded: Option<Vec<String>> = store.load().unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_file_store_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("state.json");
        let store = FileStore::open(&path).unwrap();
        store.save(&vec!["a".to_string()]).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_file_store_overwrites_and_leaves_no_tmp() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = FileStore::open(&path).unwrap();

        store.save(&vec![1u32]).unwrap();
        store.save(&vec![2u32, 3]).unwrap();

        let loaded: Option<Vec<u32>> = store.load().unwrap();
        assert_eq!(loaded, Some(vec![2, 3]));
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[test]
    fn test_file_store_corrupt_file_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();

        let store = FileStore::open(&path).unwrap();
        let result: StoreResult<Option<Vec<u32>>> = store.load();
        assert!(result.is_err());
    }

    #[test]
    fn test_file_store_clear() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = FileStore::open(&path).unwrap();
        store.save(&vec![1u32]).unwrap();

        DurableStore::<Vec<u32>>::clear(&store).unwrap();
        assert!(!path.exists());
        assert!(DurableStore::<Vec<u32>>::describe(&store).starts_with("file:"));
    }
}
