//! Domain types for JobDaemon
//!
//! Core domain types: Job, JobId, Priority and the job lifecycle.
//! All are serde-serializable so the durable store can snapshot them.

mod id;
mod job;
mod priority;

pub use id::{IdResolver, JobId};
pub use job::{
    DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_MS, FailureKind, Job, JobFailure, JobFilter, JobStatus, LogEntry, LogLevel,
    SubmitOptions, TransitionError,
};
pub use priority::Priority;

/// Current time as Unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
