//! Append-only JSONL snapshot journal

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::{DurableStore, StoreError, StoreResult};

/// Snapshot store that appends each snapshot as one JSON line
///
/// The last line that parses wins, so a torn final write falls back to the
/// snapshot before it. After `compact_after` appends the journal is
/// rewritten down to the latest snapshot.
#[derive(Debug)]
pub struct JournalStore {
    path: PathBuf,
    compact_after: usize,
    appends: Mutex<usize>,
}

impl JournalStore {
    /// Open (or prepare) a journal at the given path
    pub fn open(path: impl AsRef<Path>, compact_after: usize) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let existing = if path.exists() {
            fs::read_to_string(&path)?.lines().filter(|l| !l.trim().is_empty()).count()
        } else {
            0
        };
        debug!(?path, existing, compact_after, "JournalStore::open: opened");
        Ok(Self {
            path,
            compact_after: compact_after.max(1),
            appends: Mutex::new(existing),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of lines currently in the journal
    pub fn line_count(&self) -> usize {
        self.appends.lock().map(|n| *n).unwrap_or(0)
    }

    fn rewrite(&self, line: &str) -> StoreResult<()> {
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        {
            let mut file = File::create(&tmp)?;
            writeln!(file, "{}", line)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl<S> DurableStore<S> for JournalStore
where
    S: Serialize + DeserializeOwned,
{
    fn load(&self) -> StoreResult<Option<S>> {
        debug!(path = ?self.path, "JournalStore::load: called");
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path)?;
        let mut latest = None;
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<S>(line) {
                Ok(state) => latest = Some(state),
                Err(e) => warn!(lineno, error = %e, "JournalStore::load: skipping malformed line"),
            }
        }
        if latest.is_some() {
            info!(path = %self.path.display(), "Loaded snapshot from journal");
        }
        Ok(latest)
    }

    fn save(&self, state: &S) -> StoreResult<()> {
        let line = serde_json::to_string(state)?;
        let mut appends = self.appends.lock().map_err(|e| StoreError::Lock(e.to_string()))?;

        if *appends >= self.compact_after {
            debug!(appends = *appends, "JournalStore::save: compacting");
            self.rewrite(&line)?;
            *appends = 1;
            return Ok(());
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;
        if !ends_at_line_boundary(&mut file)? {
            warn!(path = %self.path.display(), "JournalStore::save: sealing torn final line");
            writeln!(file)?;
        }
        writeln!(file, "{}", line)?;
        file.flush()?;
        *appends += 1;
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        let mut appends = self.appends.lock().map_err(|e| StoreError::Lock(e.to_string()))?;
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        *appends = 0;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("journal:{}", self.path.display())
    }
}

/// True when the file is empty or its last byte is a newline
fn ends_at_line_boundary(file: &mut File) -> StoreResult<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_journal_last_snapshot_wins() {
        let dir = tempdir().unwrap();
        let store = JournalStore::open(dir.path().join("state.jsonl"), 100).unwrap();

        store.save(&vec![1u32]).unwrap();
        store.save(&vec![1u32, 2]).unwrap();

        let loaded: Option<Vec<u32>> = store.load().unwrap();
        assert_eq!(loaded, Some(vec![1, 2]));
        assert_eq!(store.line_count(), 2);
    }

    #[test]
    fn test_journal_skips_torn_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.jsonl");
        let store = JournalStore::open(&path, 100).unwrap();
        store.save(&vec![7u32]).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "[8, 9").unwrap();

        let loaded: Option<Vec<u32>> = store.load().unwrap();
        assert_eq!(loaded, Some(vec![7]));
    }

    #[test]
    fn test_journal_save_after_torn_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.jsonl");
        fs::write(&path, "[1]\n[2,3").unwrap();

        let store = JournalStore::open(&path, 100).unwrap();
        store.save(&vec![9u32]).unwrap();

        let reopened = JournalStore::open(&path, 100).unwrap();
        let loaded: Option<Vec<u32>> = reopened.load().unwrap();
        assert_eq!(loaded, Some(vec![9]));
        assert_eq!(fs::read_to_string(&path).unwrap(), "[1]\n[2,3\n[9]\n");
    }

    #[test]
    fn test_journal_compacts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.jsonl");
        let store = JournalStore::open(&path, 3).unwrap();

        for n in 0..3u32 {
            store.save(&vec![n]).unwrap();
        }
        assert_eq!(store.line_count(), 3);

        store.save(&vec![99u32]).unwrap();
        assert_eq!(store.line_count(), 1);
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 1);

        let loaded: Option<Vec<u32>> = store.load().unwrap();
        assert_eq!(loaded, Some(vec![99]));
    }

    #[test]
    fn test_journal_reopen_counts_existing_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.jsonl");
        {
            let store = JournalStore::open(&path, 100).unwrap();
            store.save(&vec![1u32]).unwrap();
            store.save(&vec![2u32]).unwrap();
        }
        let reopened = JournalStore::open(&path, 100).unwrap();
        assert_eq!(reopened.line_count(), 2);
    }
}
