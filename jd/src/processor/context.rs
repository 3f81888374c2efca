//! Per-attempt context handed to a processor

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::{JobId, LogLevel};

/// Sink for progress and log writes coming out of a running attempt
///
/// `lease` identifies the attempt; implementations must drop writes for an
/// attempt that is no longer live and return false.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report_progress(&self, job_id: &JobId, lease: u64, pct: u8, message: Option<String>) -> bool;

    async fn report_log(&self, job_id: &JobId, lease: u64, level: LogLevel, message: String) -> bool;
}

/// Reporter that accepts and discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedReporter;

#[async_trait]
impl ProgressReporter for DetachedReporter {
    async fn report_progress(&self, job_id: &JobId, _lease: u64, pct: u8, _message: Option<String>) -> bool {
        debug!(%job_id, pct, "DetachedReporter::report_progress: called");
        true
    }

    async fn report_log(&self, job_id: &JobId, _lease: u64, level: LogLevel, _message: String) -> bool {
        debug!(%job_id, %level, "DetachedReporter::report_log: called");
        true
    }
}

/// Handle a processor uses to talk back to the scheduler
#[derive(Clone)]
pub struct JobContext {
    job_id: JobId,
    attempt: u32,
    lease: u64,
    token: CancellationToken,
    reporter: Arc<dyn ProgressReporter>,
}

impl JobContext {
    pub fn new(
        job_id: JobId,
        attempt: u32,
        lease: u64,
        token: CancellationToken,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            job_id,
            attempt,
            lease,
            token,
            reporter,
        }
    }

    /// Context not attached to any scheduler, for driving a processor directly
    pub fn detached(job_id: JobId) -> Self {
        Self::new(job_id, 1, 0, CancellationToken::new(), Arc::new(DetachedReporter))
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// 1-based attempt number (retry count + 1)
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Report progress (clamped to 100); returns false if the attempt is stale
    pub async fn update_progress(&self, pct: u8, message: impl Into<String>) -> bool {
        let message = message.into();
        let message = (!message.is_empty()).then_some(message);
        self.reporter
            .report_progress(&self.job_id, self.lease, pct.min(100), message)
            .await
    }

    /// Append to the job's log; returns false if the attempt is stale
    pub async fn log(&self, message: impl Into<String>, level: LogLevel) -> bool {
        self.reporter
            .report_log(&self.job_id, self.lease, level, message.into())
            .await
    }

    /// Set once the job is cancelled, timed out, or the scheduler shuts down
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when `is_cancelled` becomes true
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Token for handing cancellation to nested work
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("job_id", &self.job_id)
            .field("attempt", &self.attempt)
            .field("lease", &self.lease)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}
