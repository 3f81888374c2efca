//! Snapshot layout written to the durable store

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::domain::{Job, JobStatus};

use super::queue::SchedulerStats;

/// Bumped when the snapshot layout changes incompatibly
pub const STATE_VERSION: u32 = 1;

/// Everything needed to rebuild the scheduler after a restart
///
/// Running jobs are never written; a crash mid-attempt drops that attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub version: u32,

    /// Queued jobs in admission order
    #[serde(default)]
    pub queue: Vec<Job>,

    /// Terminal jobs, oldest first
    #[serde(default)]
    pub completed: Vec<Job>,

    #[serde(default)]
    pub stats: SchedulerStats,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            queue: Vec::new(),
            completed: Vec::new(),
            stats: SchedulerStats::default(),
        }
    }
}

/// Validated contents of a snapshot, ready to load into a scheduler
#[derive(Debug, Default)]
pub(super) struct Restored {
    pub queued: Vec<Job>,
    pub history: Vec<Job>,
    pub stats: SchedulerStats,
    pub dropped: usize,
}

impl PersistedState {
    /// Keep only entries that are consistent with where they were found
    ///
    /// `queue` entries must be queued and `completed` entries terminal; ids
    /// must be unique across both lists.
    pub(super) fn into_restored(self) -> Restored {
        debug!(
            version = self.version,
            queued = self.queue.len(),
            completed = self.completed.len(),
            "PersistedState::into_restored: called"
        );
        if self.version > STATE_VERSION {
            warn!(version = self.version, supported = STATE_VERSION, "Snapshot is newer than this build");
        }

        let mut seen = HashSet::new();
        let mut restored = Restored {
            stats: self.stats,
            ..Default::default()
        };

        for job in self.queue {
            if job.status != JobStatus::Queued || !seen.insert(job.id.clone()) {
                warn!(job_id = %job.id, status = %job.status, "Dropping inconsistent queue entry from snapshot");
                restored.dropped += 1;
                continue;
            }
            restored.queued.push(job);
        }
        for job in self.completed {
            if !job.status.is_terminal() || !seen.insert(job.id.clone()) {
                warn!(job_id = %job.id, status = %job.status, "Dropping inconsistent history entry from snapshot");
                restored.dropped += 1;
                continue;
            }
            restored.history.push(job);
        }
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobFailure;
    use serde_json::json;

    fn running_job() -> Job {
        let mut job = Job::new("echo", json!(null));
        job.start().unwrap();
        job
    }

    #[test]
    fn test_default_has_current_version() {
        assert_eq!(PersistedState::default().version, STATE_VERSION);
    }

    #[test]
    fn test_missing_fields_default() {
        let state: PersistedState = serde_json::from_str("{}").unwrap();
        assert_eq!(state.version, 0);
        assert!(state.queue.is_empty());
        assert_eq!(state.stats, SchedulerStats::default());
    }

    #[test]
    fn test_into_restored_filters_inconsistent_entries() {
        let queued = Job::new("echo", json!(1));
        let mut failed = running_job();
        failed.fail(JobFailure::timeout(10)).unwrap();

        let state = PersistedState {
            queue: vec![queued.clone(), running_job(), queued.clone()],
            completed: vec![failed.clone(), Job::new("echo", json!(2))],
            ..Default::default()
        };

        let restored = state.into_restored();
        assert_eq!(restored.queued.len(), 1);
        assert_eq!(restored.queued[0].id, queued.id);
        assert_eq!(restored.history.len(), 1);
        assert_eq!(restored.history[0].id, failed.id);
        assert_eq!(restored.dropped, 3);
    }
}
