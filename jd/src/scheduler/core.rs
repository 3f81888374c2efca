//! Scheduler implementation

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use jobstore::{DurableStore, NullStore, StoreError};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, Notify, RwLock, broadcast};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::{
    FailureKind, IdResolver, Job, JobFailure, JobFilter, JobId, JobStatus, LogLevel, SubmitOptions, TransitionError,
    now_ms,
};
use crate::events::{EventBus, EventSubscription, JobEvent, JobEventKind};
use crate::processor::{JobContext, Processor, ProcessorError, ProcessorRegistry, ProgressReporter};

use super::config::SchedulerConfig;
use super::persist::{PersistedState, STATE_VERSION};
use super::queue::{JobQueue, QueueStatus, SchedulerStats};

/// Errors from scheduler control operations
///
/// The loop itself never returns errors; failures land on the job.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Ambiguous job reference '{reference}' matches {count} jobs", count = .candidates.len())]
    Ambiguous { reference: String, candidates: Vec<JobId> },

    #[error("Cannot {operation} job {id} while {status}")]
    InvalidState {
        id: JobId,
        status: JobStatus,
        operation: &'static str,
    },

    #[error("Scheduler loop already started")]
    AlreadyStarted,

    #[error("Scheduler is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Snapshot writer failed: {0}")]
    Writer(#[from] tokio::task::JoinError),
}

/// The live attempt of a running job
struct InFlight {
    lease: u64,
    deadline: Instant,
    token: CancellationToken,
}

/// Internal state protected by mutex
///
/// `jobs` owns every record; `queue`, `running` and `history` hold ids only.
#[derive(Default)]
struct SchedulerInner {
    jobs: HashMap<JobId, Job>,
    queue: JobQueue,
    running: HashMap<JobId, InFlight>,
    history: Vec<JobId>,
    stats: SchedulerStats,
    next_lease: u64,
    snapshot_seq: u64,
}

/// A snapshot and its place in the order snapshots were taken
struct Snapshot {
    seq: u64,
    state: PersistedState,
}

/// Writes snapshots to the store, never letting an older one replace a newer one
struct SnapshotWriter {
    store: Arc<dyn DurableStore<PersistedState>>,
    written: std::sync::Mutex<u64>,
}

impl SnapshotWriter {
    fn write(&self, snapshot: Snapshot) -> Result<(), StoreError> {
        let mut written = self.written.lock().map_err(|e| StoreError::Lock(e.to_string()))?;
        if snapshot.seq <= *written {
            debug!(seq = snapshot.seq, written = *written, "SnapshotWriter::write: superseded, skipping");
            return Ok(());
        }
        self.store.save(&snapshot.state)?;
        *written = snapshot.seq;
        Ok(())
    }
}

impl SchedulerInner {
    fn is_live(&self, id: &JobId, lease: u64) -> bool {
        self.running.get(id).is_some_and(|flight| flight.lease == lease)
    }

    fn snapshot(&self) -> PersistedState {
        let queue = self
            .queue
            .ids_in_order()
            .iter()
            .filter_map(|id| self.jobs.get(id))
            .cloned()
            .collect();
        let completed = self.history.iter().filter_map(|id| self.jobs.get(id)).cloned().collect();
        PersistedState {
            version: STATE_VERSION,
            queue,
            completed,
            stats: self.stats.clone(),
        }
    }

    fn take_snapshot(&mut self) -> Snapshot {
        self.snapshot_seq += 1;
        Snapshot {
            seq: self.snapshot_seq,
            state: self.snapshot(),
        }
    }

    fn restore(&mut self, state: PersistedState) {
        let restored = state.into_restored();
        let (queued, history) = (restored.queued.len(), restored.history.len());
        for job in restored.queued {
            self.queue.enqueue(job.id.clone(), job.priority);
            self.jobs.insert(job.id.clone(), job);
        }
        for job in restored.history {
            self.history.push(job.id.clone());
            self.jobs.insert(job.id.clone(), job);
        }
        self.stats = restored.stats;
        info!(queued, history, dropped = restored.dropped, "Restored scheduler state");
    }

    /// Earliest running deadline or backoff expiry
    fn next_wake(&self) -> Option<Instant> {
        let deadline = self.running.values().map(|flight| flight.deadline).min();
        match (deadline, self.queue.next_ready_at()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn note_queue_depth(&mut self) {
        self.stats.peak_queue_depth = self.stats.peak_queue_depth.max(self.queue.len());
    }
}

struct Shared {
    config: SchedulerConfig,
    inner: Mutex<SchedulerInner>,
    registry: RwLock<ProcessorRegistry>,
    writer: Arc<SnapshotWriter>,
    events: EventBus,
    notify: Notify,
    shutdown: CancellationToken,
    started: AtomicBool,
}

impl Shared {
    fn emit(&self, kind: JobEventKind, job: &Job) {
        self.events.emit(JobEvent::new(kind, job.clone()));
    }

    /// Write a snapshot on the blocking pool, outside the state lock
    async fn write_snapshot(&self, snapshot: Snapshot) -> Result<(), SchedulerError> {
        let writer = Arc::clone(&self.writer);
        tokio::task::spawn_blocking(move || writer.write(snapshot)).await??;
        Ok(())
    }

    /// Write a snapshot; store failures are logged and swallowed
    async fn persist(&self, snapshot: Snapshot) {
        if let Err(e) = self.write_snapshot(snapshot).await {
            warn!(store = %self.writer.store.describe(), error = %e, "Failed to persist scheduler state");
        }
    }

    async fn run(self: Arc<Self>) {
        info!(
            max_concurrent = self.config.max_concurrent(),
            tick_ms = self.config.tick_interval_ms,
            "Scheduler loop started"
        );
        let tick = self.config.tick_interval();
        while !self.shutdown.is_cancelled() {
            self.check_timeouts().await;
            let fallback = Instant::now() + tick;
            let wake_at = self.admit().await.map_or(fallback, |at| at.min(fallback));

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
        info!("Scheduler loop stopped");
    }

    /// Fail every running job past its deadline
    async fn check_timeouts(&self) {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let now = Instant::now();

        let expired: Vec<JobId> = inner
            .running
            .iter()
            .filter(|(_, flight)| flight.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        if expired.is_empty() {
            return;
        }

        for id in expired {
            let Some(flight) = inner.running.remove(&id) else {
                continue;
            };
            flight.token.cancel();
            let Some(job) = inner.jobs.get_mut(&id) else {
                continue;
            };
            let failure = JobFailure::timeout(job.timeout_ms);
            if let Err(e) = job.fail(failure) {
                warn!(job_id = %id, error = %e, "Could not mark timed-out job failed");
                continue;
            }
            warn!(job_id = %id, timeout_ms = job.timeout_ms, "Job timed out");
            self.emit(JobEventKind::Failed, job);
            inner.history.push(id);
            inner.stats.total_failed += 1;
            inner.stats.total_timed_out += 1;
        }
        let snapshot = inner.take_snapshot();
        drop(guard);
        self.persist(snapshot).await;
    }

    /// Promote matured retries, then start jobs while slots are free
    ///
    /// Returns the next instant something becomes due.
    async fn admit(self: &Arc<Self>) -> Option<Instant> {
        let registry = self.registry.read().await;
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let now = Instant::now();

        let promoted = inner.queue.promote_due(now);
        if promoted > 0 {
            debug!(promoted, "Shared::admit: promoted jobs out of backoff");
        }

        let mut changed = false;
        while inner.running.len() < self.config.max_concurrent() {
            let Some(id) = inner.queue.dequeue() else {
                break;
            };
            let Some(job) = inner.jobs.get_mut(&id) else {
                warn!(job_id = %id, "Queued id has no job record, skipping");
                continue;
            };
            changed = true;

            let Some(processor) = registry.get(&job.job_type) else {
                error!(job_id = %id, job_type = %job.job_type, "No processor registered for job type");
                let failure = JobFailure::configuration(&job.job_type);
                if let Err(e) = job.fail(failure) {
                    warn!(job_id = %id, error = %e, "Could not fail unprocessable job");
                    continue;
                }
                self.emit(JobEventKind::Failed, job);
                inner.history.push(id);
                inner.stats.total_failed += 1;
                continue;
            };

            if let Err(e) = job.start() {
                warn!(job_id = %id, error = %e, "Could not start job");
                continue;
            }
            inner.next_lease += 1;
            let lease = inner.next_lease;
            let attempt = job.retry_count + 1;
            let token = self.shutdown.child_token();
            let deadline = now + Duration::from_millis(job.timeout_ms);
            let reporter: Arc<dyn ProgressReporter> = Arc::clone(self) as Arc<dyn ProgressReporter>;
            let ctx = JobContext::new(id.clone(), attempt, lease, token.clone(), reporter);
            let payload = job.payload.clone();

            info!(job_id = %id, job_type = %job.job_type, attempt, "Job started");
            self.emit(JobEventKind::Started, job);
            inner.running.insert(id.clone(), InFlight { lease, deadline, token });
            inner.stats.total_started += 1;
            inner.stats.peak_concurrent = inner.stats.peak_concurrent.max(inner.running.len());

            self.spawn_attempt(id, lease, processor, payload, ctx);
        }

        let wake = inner.next_wake();
        let snapshot = changed.then(|| inner.take_snapshot());
        drop(guard);
        drop(registry);
        if let Some(snapshot) = snapshot {
            self.persist(snapshot).await;
        }
        wake
    }

    /// Run one attempt off the loop; a panic becomes a fatal failure
    fn spawn_attempt(
        self: &Arc<Self>,
        id: JobId,
        lease: u64,
        processor: Arc<dyn Processor>,
        payload: Value,
        ctx: JobContext,
    ) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let attempt = tokio::spawn(async move { processor.process(payload, ctx).await });
            let outcome = match attempt.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_panic() => Err(ProcessorError::fatal(format!(
                    "Processor panicked: {}",
                    panic_message(e.into_panic())
                ))),
                Err(e) => Err(ProcessorError::fatal(format!("Processor task aborted: {}", e))),
            };
            shared.finish(&id, lease, outcome).await;
        });
    }

    /// Apply an attempt's outcome if that attempt is still live
    async fn finish(&self, id: &JobId, lease: u64, outcome: Result<Value, ProcessorError>) {
        debug!(job_id = %id, lease, ok = outcome.is_ok(), "Shared::finish: called");
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        if !inner.is_live(id, lease) {
            debug!(job_id = %id, lease, "Shared::finish: attempt no longer live, discarding outcome");
            return;
        }
        inner.running.remove(id);
        let Some(job) = inner.jobs.get_mut(id) else {
            warn!(job_id = %id, "Finished attempt has no job record");
            return;
        };

        match outcome {
            Ok(result) => match job.complete(result) {
                Ok(()) => {
                    let run_ms = job.run_time_ms().unwrap_or(0).max(0) as u64;
                    info!(job_id = %id, run_ms, "Job completed");
                    self.emit(JobEventKind::Completed, job);
                    inner.history.push(id.clone());
                    inner.stats.total_completed += 1;
                    inner.stats.total_run_time_ms += run_ms;
                }
                Err(e) => warn!(job_id = %id, error = %e, "Could not complete job"),
            },
            Err(ProcessorError::Retryable(message)) if job.can_retry() => {
                let delay = self.config.backoff.delay_for(job.retry_count);
                match job.requeue(&message) {
                    Ok(retry_count) => {
                        warn!(
                            job_id = %id,
                            retry_count,
                            max_retries = job.max_retries,
                            delay_ms = delay.as_millis() as u64,
                            error = %message,
                            "Job failed, retrying after backoff"
                        );
                        self.emit(JobEventKind::Retried, job);
                        inner.queue.park(id.clone(), job.priority, Instant::now() + delay);
                        inner.stats.total_retried += 1;
                    }
                    Err(e) => warn!(job_id = %id, error = %e, "Could not requeue job"),
                }
            }
            Err(err) => {
                let failure = match err {
                    ProcessorError::Retryable(message) => JobFailure::new(
                        FailureKind::RetriesExhausted,
                        format!("{} (gave up after {} retries)", message, job.retry_count),
                    ),
                    ProcessorError::Fatal(message) => JobFailure::new(FailureKind::Processor, message),
                };
                match job.fail(failure) {
                    Ok(()) => {
                        error!(job_id = %id, retry_count = job.retry_count, "Job failed");
                        self.emit(JobEventKind::Failed, job);
                        inner.history.push(id.clone());
                        inner.stats.total_failed += 1;
                    }
                    Err(e) => warn!(job_id = %id, error = %e, "Could not fail job"),
                }
            }
        }

        let snapshot = inner.take_snapshot();
        drop(guard);
        self.notify.notify_one();
        self.persist(snapshot).await;
    }
}

#[async_trait]
impl ProgressReporter for Shared {
    async fn report_progress(&self, job_id: &JobId, lease: u64, pct: u8, message: Option<String>) -> bool {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        if !inner.is_live(job_id, lease) {
            debug!(%job_id, lease, "Shared::report_progress: stale attempt, ignoring");
            return false;
        }
        let Some(job) = inner.jobs.get_mut(job_id) else {
            return false;
        };
        if !job.set_progress(pct, message.as_deref()) {
            return false;
        }
        self.emit(JobEventKind::Progress, job);
        true
    }

    async fn report_log(&self, job_id: &JobId, lease: u64, level: LogLevel, message: String) -> bool {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        if !inner.is_live(job_id, lease) {
            debug!(%job_id, lease, "Shared::report_log: stale attempt, ignoring");
            return false;
        }
        match inner.jobs.get_mut(job_id) {
            Some(job) => {
                job.append_log(level, message);
                true
            }
            None => false,
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// The Scheduler admits queued jobs by priority under a concurrency
/// ceiling, enforces timeouts, retries with backoff, and persists its state
/// after every change.
///
/// Cheap to clone; all clones drive the same scheduler.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Create a scheduler, restoring whatever `store` holds
    pub fn new(
        config: SchedulerConfig,
        registry: ProcessorRegistry,
        store: Arc<dyn DurableStore<PersistedState>>,
    ) -> Self {
        debug!(?config, store = %store.describe(), "Scheduler::new: called");
        let mut inner = SchedulerInner::default();
        match store.load() {
            Ok(Some(state)) => inner.restore(state),
            Ok(None) => debug!("Scheduler::new: no snapshot, starting empty"),
            Err(e) => warn!(error = %e, "Failed to load snapshot, starting empty"),
        }

        let events = EventBus::new(config.event_capacity);
        Self {
            shared: Arc::new(Shared {
                config,
                inner: Mutex::new(inner),
                registry: RwLock::new(registry),
                writer: Arc::new(SnapshotWriter {
                    store,
                    written: std::sync::Mutex::new(0),
                }),
                events,
                notify: Notify::new(),
                shutdown: CancellationToken::new(),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Scheduler without persistence
    pub fn in_memory(config: SchedulerConfig, registry: ProcessorRegistry) -> Self {
        Self::new(config, registry, Arc::new(NullStore))
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    /// Spawn the scheduling loop
    pub fn start(&self) -> Result<JoinHandle<()>, SchedulerError> {
        debug!("Scheduler::start: called");
        if self.shared.shutdown.is_cancelled() {
            return Err(SchedulerError::ShuttingDown);
        }
        if self.shared.started.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyStarted);
        }
        let shared = Arc::clone(&self.shared);
        Ok(tokio::spawn(shared.run()))
    }

    /// Stop the loop, signal running attempts, and write a final snapshot
    ///
    /// Running jobs are not part of the snapshot.
    pub async fn shutdown(&self) {
        info!("Scheduler shutting down");
        // Attempt tokens are children of this one
        self.shared.shutdown.cancel();
        let snapshot = {
            let mut inner = self.shared.inner.lock().await;
            if !inner.running.is_empty() {
                warn!(running = inner.running.len(), "Abandoning running jobs at shutdown");
            }
            inner.take_snapshot()
        };
        self.shared.persist(snapshot).await;
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Register or replace the processor for a job type
    pub async fn register_processor(&self, job_type: impl Into<String>, processor: impl Processor + 'static) {
        let job_type = job_type.into();
        debug!(%job_type, "Scheduler::register_processor: called");
        self.shared.registry.write().await.register(job_type, processor);
        self.shared.notify.notify_one();
    }

    pub async fn processor_types(&self) -> Vec<String> {
        self.shared.registry.read().await.types()
    }

    /// Queue a new job; options left unset take the configured defaults
    pub async fn submit(&self, job_type: impl Into<String>, payload: Value, options: SubmitOptions) -> Job {
        let config = &self.shared.config;
        let mut job = Job::new(job_type, payload)
            .with_priority(options.priority.unwrap_or(config.default_priority))
            .with_max_retries(options.max_retries.unwrap_or(config.default_max_retries))
            .with_timeout_ms(options.timeout_ms.unwrap_or(config.default_timeout_ms));
        if let Some(owner_id) = options.owner_id {
            job = job.with_owner(owner_id);
        }
        if let Some(group_id) = options.group_id {
            job = job.with_group(group_id);
        }
        debug!(job_id = %job.id, job_type = %job.job_type, priority = %job.priority, "Scheduler::submit: called");

        let snapshot = {
            let mut guard = self.shared.inner.lock().await;
            let inner = &mut *guard;
            inner.queue.enqueue(job.id.clone(), job.priority);
            inner.jobs.insert(job.id.clone(), job.clone());
            inner.stats.total_submitted += 1;
            inner.note_queue_depth();
            self.shared.emit(JobEventKind::Added, &job);
            inner.take_snapshot()
        };
        self.shared.notify.notify_one();
        self.shared.persist(snapshot).await;
        job
    }

    pub async fn get_job(&self, id: &JobId) -> Option<Job> {
        debug!(job_id = %id, "Scheduler::get_job: called");
        self.shared.inner.lock().await.jobs.get(id).cloned()
    }

    /// Resolve a full id or unique id prefix
    pub async fn resolve_id(&self, reference: &str) -> Result<JobId, SchedulerError> {
        debug!(%reference, "Scheduler::resolve_id: called");
        let inner = self.shared.inner.lock().await;
        match IdResolver::new(inner.jobs.keys()).resolve(reference) {
            Ok(Some(id)) => Ok(id),
            Ok(None) => Err(SchedulerError::NotFound(reference.to_string())),
            Err(candidates) => Err(SchedulerError::Ambiguous {
                reference: reference.to_string(),
                candidates,
            }),
        }
    }

    /// Jobs matching `filter`, oldest first
    pub async fn list_jobs(&self, filter: &JobFilter) -> Vec<Job> {
        debug!(?filter, "Scheduler::list_jobs: called");
        let inner = self.shared.inner.lock().await;
        let mut jobs: Vec<Job> = inner.jobs.values().filter(|job| filter.matches(job)).cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    /// 1-based admission position of a queued job
    pub async fn queue_position(&self, id: &JobId) -> Option<usize> {
        self.shared.inner.lock().await.queue.position(id)
    }

    pub async fn queue_status(&self) -> QueueStatus {
        debug!("Scheduler::queue_status: called");
        let inner = self.shared.inner.lock().await;
        let mut status = QueueStatus {
            queued: inner.queue.len(),
            running: inner.running.len(),
            ..Default::default()
        };
        for job in inner.history.iter().filter_map(|id| inner.jobs.get(id)) {
            match job.status {
                JobStatus::Complete => status.completed_count += 1,
                JobStatus::Failed => status.failed_count += 1,
                JobStatus::Cancelled => status.cancelled_count += 1,
                JobStatus::Queued | JobStatus::Running => {}
            }
        }
        status
    }

    pub async fn stats(&self) -> SchedulerStats {
        debug!("Scheduler::stats: called");
        self.shared.inner.lock().await.stats.clone()
    }

    /// Cancel a queued or running job
    ///
    /// A running attempt's token is cancelled and its eventual outcome is
    /// discarded.
    pub async fn cancel(&self, id: &JobId) -> Result<Job, SchedulerError> {
        debug!(job_id = %id, "Scheduler::cancel: called");
        let mut guard = self.shared.inner.lock().await;
        let inner = &mut *guard;
        let Some(job) = inner.jobs.get_mut(id) else {
            return Err(SchedulerError::NotFound(id.to_string()));
        };

        match job.status {
            JobStatus::Queued => {
                inner.queue.remove(id);
            }
            JobStatus::Running => {
                if let Some(flight) = inner.running.remove(id) {
                    flight.token.cancel();
                }
            }
            status => {
                return Err(SchedulerError::InvalidState {
                    id: id.clone(),
                    status,
                    operation: "cancel",
                });
            }
        }
        job.cancel()?;
        info!(job_id = %id, "Job cancelled");
        self.shared.emit(JobEventKind::Cancelled, job);
        let cancelled = job.clone();

        inner.history.push(id.clone());
        inner.stats.total_cancelled += 1;
        let snapshot = inner.take_snapshot();
        drop(guard);
        self.shared.notify.notify_one();
        self.shared.persist(snapshot).await;
        Ok(cancelled)
    }

    /// Put a failed job back in the queue with a fresh retry budget
    pub async fn retry(&self, id: &JobId) -> Result<Job, SchedulerError> {
        debug!(job_id = %id, "Scheduler::retry: called");
        let mut guard = self.shared.inner.lock().await;
        let inner = &mut *guard;
        let Some(job) = inner.jobs.get_mut(id) else {
            return Err(SchedulerError::NotFound(id.to_string()));
        };
        if job.status != JobStatus::Failed {
            return Err(SchedulerError::InvalidState {
                id: id.clone(),
                status: job.status,
                operation: "retry",
            });
        }

        job.reset_for_manual_retry()?;
        info!(job_id = %id, "Job resubmitted");
        self.shared.emit(JobEventKind::Retried, job);
        let requeued = job.clone();

        inner.history.retain(|h| h != id);
        inner.queue.enqueue(id.clone(), requeued.priority);
        inner.stats.total_retried += 1;
        inner.note_queue_depth();
        let snapshot = inner.take_snapshot();
        drop(guard);
        self.shared.notify.notify_one();
        self.shared.persist(snapshot).await;
        Ok(requeued)
    }

    /// Drop terminal jobs that finished at least `older_than` ago
    pub async fn purge_history(&self, older_than: Duration) -> usize {
        debug!(?older_than, "Scheduler::purge_history: called");
        let cutoff = now_ms() - i64::try_from(older_than.as_millis()).unwrap_or(i64::MAX);
        let mut guard = self.shared.inner.lock().await;
        let inner = &mut *guard;

        let jobs = &inner.jobs;
        let (purged, kept): (Vec<JobId>, Vec<JobId>) = std::mem::take(&mut inner.history)
            .into_iter()
            .partition(|id| {
                jobs.get(id)
                    .and_then(|job| job.completed_at)
                    .is_none_or(|done| done <= cutoff)
            });
        inner.history = kept;

        for id in &purged {
            if let Some(job) = inner.jobs.remove(id) {
                self.shared.emit(JobEventKind::Purged, &job);
            }
        }
        if purged.is_empty() {
            return 0;
        }
        info!(purged = purged.len(), "Purged job history");
        let snapshot = inner.take_snapshot();
        drop(guard);
        self.shared.persist(snapshot).await;
        purged.len()
    }

    /// Receive every job event from now on
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.shared.events.subscribe()
    }

    /// Receive only the given event kinds
    pub fn subscribe_to(&self, kinds: &[JobEventKind]) -> EventSubscription {
        self.shared.events.subscribe_to(kinds)
    }

    /// Write the snapshot now, surfacing store errors
    pub async fn persist_now(&self) -> Result<(), SchedulerError> {
        debug!("Scheduler::persist_now: called");
        let snapshot = self.shared.inner.lock().await.take_snapshot();
        self.shared.write_snapshot(snapshot).await
    }

    /// Wait until the job is terminal
    ///
    /// Returns the job's state at the deadline if it hasn't finished by then,
    /// or None if the job doesn't exist.
    pub async fn wait_for(&self, id: &JobId, timeout: Duration) -> Option<Job> {
        debug!(job_id = %id, ?timeout, "Scheduler::wait_for: called");
        let mut rx = self.subscribe();
        let deadline = Instant::now() + timeout;
        loop {
            let job = self.get_job(id).await?;
            if job.status.is_terminal() {
                return Some(job);
            }
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => {}
                Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => return self.get_job(id).await,
            }
        }
    }

    /// Wait until nothing is queued or running; false on timeout
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        debug!(?timeout, "Scheduler::wait_idle: called");
        let mut rx = self.subscribe();
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.queue_status().await;
            if status.queued == 0 && status.running == 0 {
                return true;
            }
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => {}
                Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => return false,
            }
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.shared.config)
            .field("store", &self.shared.writer.store.describe())
            .finish()
    }
}
