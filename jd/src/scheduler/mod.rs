//! Scheduler for job execution
//!
//! Admits queued jobs by priority under a concurrency ceiling, enforces
//! per-attempt timeouts, retries retryable failures with backoff, and
//! persists a snapshot after every state change.

mod config;
mod core;
mod persist;
mod queue;

pub use config::{BackoffConfig, SchedulerConfig};
pub use core::{Scheduler, SchedulerError};
pub use persist::{PersistedState, STATE_VERSION};
pub use queue::{JobQueue, QueueStatus, SchedulerStats};
