//! Job domain type
//!
//! Identity and mutable state for one unit of work. All status changes go
//! through the transition methods below so the lifecycle invariants hold no
//! matter who drives them:
//!
//! ```text
//!            start              complete
//!   Queued ---------> Running -----------> Complete
//!     ^  |              |  |
//!     |  |    requeue   |  |  fail
//!     |  +--------------+  +-------------> Failed
//!     |                                      |
//!     +-------- reset_for_manual_retry ------+
//!
//!   Queued | Running --cancel--> Cancelled
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::id::JobId;
use super::now_ms;
use super::priority::Priority;

/// Default number of automatic re-attempts
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default per-attempt wall-clock budget (5 minutes)
pub const DEFAULT_TIMEOUT_MS: u64 = 300_000;

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the queue
    #[default]
    Queued,
    /// Admitted and handed to a processor
    Running,
    /// Processor returned a result
    Complete,
    /// Fatal error, timeout, or retries exhausted
    Failed,
    /// Caller cancelled
    Cancelled,
}

impl JobStatus {
    /// No further automatic transition happens from a terminal status
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "complete" | "completed" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// Why a job failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No processor registered for the job type
    Configuration,
    /// Processor reported a fatal error
    Processor,
    /// Attempt exceeded its wall-clock budget
    Timeout,
    /// Retryable errors kept coming until max_retries was reached
    RetriesExhausted,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Processor => write!(f, "processor"),
            Self::Timeout => write!(f, "timeout"),
            Self::RetriesExhausted => write!(f, "retries_exhausted"),
        }
    }
}

/// Error recorded on a failed job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn configuration(job_type: &str) -> Self {
        Self::new(
            FailureKind::Configuration,
            format!("No processor registered for job type '{}'", job_type),
        )
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self::new(FailureKind::Timeout, format!("Timed out after {}ms", timeout_ms))
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Severity of a job log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// One line of a job's append-only log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Unix milliseconds
    pub timestamp: i64,
    pub level: LogLevel,
    pub message: String,
}

/// Illegal state machine transition
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Job {id}: cannot move from {from} to {to}")]
    Illegal { id: JobId, from: JobStatus, to: JobStatus },

    #[error("Job {id}: retries exhausted ({max_retries})")]
    RetriesExhausted { id: JobId, max_retries: u32 },
}

/// One schedulable unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier, assigned at creation
    pub id: JobId,

    /// Tag selecting the processor
    #[serde(rename = "type")]
    pub job_type: String,

    /// Caller-owned data, never inspected by the scheduler
    pub payload: Value,

    pub priority: Priority,

    pub status: JobStatus,

    /// 0..=100, updated by the processor while running
    pub progress: u8,

    /// Set only on Complete
    pub result: Option<Value>,

    /// Set only on Failed
    pub error: Option<JobFailure>,

    pub retry_count: u32,

    pub max_retries: u32,

    /// Budget per running attempt
    pub timeout_ms: u64,

    /// Unix milliseconds
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub updated_at: i64,

    pub log: Vec<LogEntry>,

    /// Correlation keys, opaque to scheduling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

impl Job {
    /// Create a queued job with default priority, retries and timeout
    pub fn new(job_type: impl Into<String>, payload: Value) -> Self {
        let now = now_ms();
        Self {
            id: JobId::generate(),
            job_type: job_type.into(),
            payload,
            priority: Priority::default(),
            status: JobStatus::Queued,
            progress: 0,
            result: None,
            error: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            log: Vec::new(),
            owner_id: None,
            group_id: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    fn illegal(&self, to: JobStatus) -> TransitionError {
        TransitionError::Illegal {
            id: self.id.clone(),
            from: self.status,
            to,
        }
    }

    fn touch(&mut self) -> i64 {
        let now = now_ms();
        self.updated_at = now;
        now
    }

    /// Queued -> Running
    pub fn start(&mut self) -> Result<(), TransitionError> {
        debug!(id = %self.id, status = %self.status, "Job::start: called");
        if self.status != JobStatus::Queued {
            return Err(self.illegal(JobStatus::Running));
        }
        let now = self.touch();
        self.status = JobStatus::Running;
        self.started_at = Some(now);
        self.progress = 0;
        self.append_log(LogLevel::Info, format!("Started (attempt {})", self.retry_count + 1));
        Ok(())
    }

    /// Running -> Complete
    pub fn complete(&mut self, result: Value) -> Result<(), TransitionError> {
        debug!(id = %self.id, status = %self.status, "Job::complete: called");
        if self.status != JobStatus::Running {
            return Err(self.illegal(JobStatus::Complete));
        }
        let now = self.touch();
        self.status = JobStatus::Complete;
        self.progress = 100;
        self.result = Some(result);
        self.error = None;
        self.completed_at = Some(now);
        self.append_log(LogLevel::Info, "Completed");
        Ok(())
    }

    /// Queued | Running -> Failed
    ///
    /// A queued job fails directly only for configuration errors found at
    /// admission.
    pub fn fail(&mut self, failure: JobFailure) -> Result<(), TransitionError> {
        debug!(id = %self.id, status = %self.status, kind = %failure.kind, "Job::fail: called");
        if !matches!(self.status, JobStatus::Queued | JobStatus::Running) {
            return Err(self.illegal(JobStatus::Failed));
        }
        let now = self.touch();
        self.status = JobStatus::Failed;
        self.result = None;
        self.append_log(LogLevel::Error, failure.to_string());
        self.error = Some(failure);
        self.completed_at = Some(now);
        Ok(())
    }

    /// Queued | Running -> Cancelled
    pub fn cancel(&mut self) -> Result<(), TransitionError> {
        debug!(id = %self.id, status = %self.status, "Job::cancel: called");
        if self.status.is_terminal() {
            return Err(self.illegal(JobStatus::Cancelled));
        }
        let now = self.touch();
        self.status = JobStatus::Cancelled;
        self.result = None;
        self.error = None;
        self.completed_at = Some(now);
        self.append_log(LogLevel::Warn, "Cancelled");
        Ok(())
    }

    /// Whether a retryable failure may send this job back to the queue
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Running -> Queued after a retryable failure
    ///
    /// Consumes one retry and returns the new retry count.
    pub fn requeue(&mut self, reason: &str) -> Result<u32, TransitionError> {
        debug!(id = %self.id, retry_count = self.retry_count, "Job::requeue: called");
        if self.status != JobStatus::Running {
            return Err(self.illegal(JobStatus::Queued));
        }
        if !self.can_retry() {
            return Err(TransitionError::RetriesExhausted {
                id: self.id.clone(),
                max_retries: self.max_retries,
            });
        }
        self.touch();
        self.retry_count += 1;
        self.status = JobStatus::Queued;
        self.progress = 0;
        self.started_at = None;
        self.append_log(
            LogLevel::Warn,
            format!("Retry {}/{}: {}", self.retry_count, self.max_retries, reason),
        );
        Ok(self.retry_count)
    }

    /// Failed -> Queued on explicit caller request; the retry budget starts over
    pub fn reset_for_manual_retry(&mut self) -> Result<(), TransitionError> {
        debug!(id = %self.id, status = %self.status, "Job::reset_for_manual_retry: called");
        if self.status != JobStatus::Failed {
            return Err(self.illegal(JobStatus::Queued));
        }
        self.touch();
        self.status = JobStatus::Queued;
        self.retry_count = 0;
        self.progress = 0;
        self.result = None;
        self.error = None;
        self.started_at = None;
        self.completed_at = None;
        self.append_log(LogLevel::Info, "Resubmitted manually");
        Ok(())
    }

    /// Record processor progress; ignored unless running
    pub fn set_progress(&mut self, pct: u8, message: Option<&str>) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        self.touch();
        self.progress = pct.min(100);
        if let Some(message) = message.filter(|m| !m.is_empty()) {
            self.append_log(LogLevel::Info, format!("[{}%] {}", self.progress, message));
        }
        true
    }

    pub fn append_log(&mut self, level: LogLevel, message: impl Into<String>) {
        let timestamp = self.touch();
        self.log.push(LogEntry {
            timestamp,
            level,
            message: message.into(),
        });
    }

    /// Time spent in the current or last attempt
    pub fn run_time_ms(&self) -> Option<i64> {
        let started = self.started_at?;
        let end = self.completed_at.unwrap_or_else(now_ms);
        Some((end - started).max(0))
    }

    /// Time between creation and the last terminal transition
    pub fn total_time_ms(&self) -> Option<i64> {
        self.completed_at.map(|done| (done - self.created_at).max(0))
    }
}

/// Per-submission overrides; `None` falls back to scheduler defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOptions {
    pub priority: Option<Priority>,
    pub max_retries: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub owner_id: Option<String>,
    pub group_id: Option<String>,
}

impl SubmitOptions {
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }
}

/// Query filter for listing jobs; `None` fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub owner_id: Option<String>,
    pub group_id: Option<String>,
    pub status: Option<JobStatus>,
}

impl JobFilter {
    pub fn matches(&self, job: &Job) -> bool {
        self.owner_id.as_ref().is_none_or(|o| job.owner_id.as_ref() == Some(o))
            && self.group_id.as_ref().is_none_or(|g| job.group_id.as_ref() == Some(g))
            && self.status.is_none_or(|s| job.status == s)
    }
}
