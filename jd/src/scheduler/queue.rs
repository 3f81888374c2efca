//! Queue types for the scheduler

use std::collections::{BTreeMap, HashMap};
use tokio::time::Instant;

use serde::{Deserialize, Serialize};

use crate::domain::{JobId, Priority};

/// Sort key: priority first, then insertion order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct QueueKey {
    priority: Priority,
    seq: u64,
}

/// A job waiting out its retry backoff
#[derive(Debug, Clone)]
struct Parked {
    id: JobId,
    priority: Priority,
    ready_at: Instant,
}

/// Waiting list of queued jobs
///
/// Ready entries are served by `(priority, insertion order)`. Entries parked
/// for a retry backoff are invisible to `dequeue` until `promote_due` moves
/// them in, at which point they get a fresh insertion sequence.
#[derive(Debug, Default)]
pub struct JobQueue {
    ready: BTreeMap<QueueKey, JobId>,
    index: HashMap<JobId, QueueKey>,
    parked: Vec<Parked>,
    next_seq: u64,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a ready job; returns false if it is already queued or parked
    pub fn enqueue(&mut self, id: JobId, priority: Priority) -> bool {
        if self.contains(&id) {
            return false;
        }
        let key = QueueKey {
            priority,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.index.insert(id.clone(), key);
        self.ready.insert(key, id);
        true
    }

    /// Remove and return the most urgent, earliest-inserted ready job
    pub fn dequeue(&mut self) -> Option<JobId> {
        let (_, id) = self.ready.pop_first()?;
        self.index.remove(&id);
        Some(id)
    }

    /// Peek at the job `dequeue` would return
    pub fn peek(&self) -> Option<&JobId> {
        self.ready.first_key_value().map(|(_, id)| id)
    }

    /// Hold a job back until `ready_at`
    pub fn park(&mut self, id: JobId, priority: Priority, ready_at: Instant) -> bool {
        if self.contains(&id) {
            return false;
        }
        self.parked.push(Parked { id, priority, ready_at });
        true
    }

    /// Move every parked job whose delay has elapsed into the ready set
    pub fn promote_due(&mut self, now: Instant) -> usize {
        if self.parked.is_empty() {
            return 0;
        }
        let (mut due, waiting): (Vec<Parked>, Vec<Parked>) =
            std::mem::take(&mut self.parked).into_iter().partition(|p| p.ready_at <= now);
        self.parked = waiting;
        due.sort_by_key(|p| p.ready_at);

        let promoted = due.len();
        for p in due {
            self.enqueue(p.id, p.priority);
        }
        promoted
    }

    /// Remove a job from anywhere in the queue; order of the rest is kept
    pub fn remove(&mut self, id: &JobId) -> bool {
        if let Some(key) = self.index.remove(id) {
            self.ready.remove(&key);
            return true;
        }
        if let Some(pos) = self.parked.iter().position(|p| &p.id == id) {
            self.parked.remove(pos);
            return true;
        }
        false
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.index.contains_key(id) || self.parked.iter().any(|p| &p.id == id)
    }

    /// Whether the job is waiting out a backoff
    pub fn is_parked(&self, id: &JobId) -> bool {
        self.parked.iter().any(|p| &p.id == id)
    }

    /// Earliest instant a parked job becomes ready
    pub fn next_ready_at(&self) -> Option<Instant> {
        self.parked.iter().map(|p| p.ready_at).min()
    }

    /// 1-based admission position among ready jobs
    pub fn position(&self, id: &JobId) -> Option<usize> {
        let key = self.index.get(id)?;
        Some(self.ready.range(..*key).count() + 1)
    }

    pub fn len(&self) -> usize {
        self.ready.len() + self.parked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub fn parked_len(&self) -> usize {
        self.parked.len()
    }

    /// Ready jobs in admission order, then parked jobs in maturity order
    pub fn ids_in_order(&self) -> Vec<JobId> {
        let mut parked: Vec<&Parked> = self.parked.iter().collect();
        parked.sort_by_key(|p| p.ready_at);
        self.ready
            .values()
            .cloned()
            .chain(parked.into_iter().map(|p| p.id.clone()))
            .collect()
    }
}

/// Statistics for the scheduler
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerStats {
    pub total_submitted: u64,
    pub total_started: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub total_cancelled: u64,
    pub total_retried: u64,
    pub total_timed_out: u64,
    pub total_run_time_ms: u64,
    pub peak_queue_depth: usize,
    pub peak_concurrent: usize,
}

impl SchedulerStats {
    /// Mean run time of completed jobs
    pub fn avg_run_time_ms(&self) -> Option<u64> {
        (self.total_completed > 0).then(|| self.total_run_time_ms / self.total_completed)
    }
}

/// Point-in-time counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub queued: usize,
    pub running: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub cancelled_count: usize,
}
