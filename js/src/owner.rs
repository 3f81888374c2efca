//! Process-wide ownership of a store location

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, info};

use crate::{StoreError, StoreResult};

/// Exclusive claim on a store, held until dropped
///
/// Every snapshot replaces the whole store, so only one process may write
/// it at a time. The claim is an advisory lock on `{path}.owner`, which also
/// records the owner's pid.
#[derive(Debug)]
pub struct OwnerLock {
    path: PathBuf,
    file: File,
}

impl OwnerLock {
    /// Claim the store at `store_path`, failing if another owner holds it
    pub fn acquire(store_path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = owner_path(store_path.as_ref());
        debug!(?path, "OwnerLock::acquire: called");
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)?;
        if let Err(e) = FileExt::try_lock_exclusive(&file) {
            if e.kind() == fs2::lock_contended_error().kind() {
                let pid = read_pid(&mut file);
                debug!(?path, ?pid, "OwnerLock::acquire: already owned");
                return Err(StoreError::Owned { path, pid });
            }
            return Err(e.into());
        }

        file.set_len(0)?;
        write!(file, "{}", std::process::id())?;
        file.sync_all()?;
        info!(path = %path.display(), pid = std::process::id(), "Claimed store ownership");
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for OwnerLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!(error = %e, "OwnerLock::drop: unlock failed");
        }
    }
}

/// `{store_path}.owner`
pub fn owner_path(store_path: &Path) -> PathBuf {
    let mut name = store_path.as_os_str().to_owned();
    name.push(".owner");
    PathBuf::from(name)
}

fn read_pid(file: &mut File) -> Option<u32> {
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_second_claim_fails_while_held() {
        let dir = tempdir().unwrap();
        let store_path = dir.path().join("state.json");

        let owner = OwnerLock::acquire(&store_path).unwrap();
        assert_eq!(owner.path(), dir.path().join("state.json.owner"));

        match OwnerLock::acquire(&store_path) {
            Err(StoreError::Owned { pid, .. }) => assert_eq!(pid, Some(std::process::id())),
            other => panic!("expected Owned, got {:?}", other),
        }
    }

    #[test]
    fn test_claim_released_on_drop() {
        let dir = tempdir().unwrap();
        let store_path = dir.path().join("nested").join("state.db");

        drop(OwnerLock::acquire(&store_path).unwrap());
        let again = OwnerLock::acquire(&store_path).unwrap();
        let pid = fs::read_to_string(again.path()).unwrap();
        assert_eq!(pid, std::process::id().to_string());
    }
}
