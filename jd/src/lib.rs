//! JobDaemon - Priority Job Scheduler
//!
//! JobDaemon runs typed units of work ("jobs") through pluggable processors
//! under a global concurrency ceiling. Jobs carry a priority, a retry budget
//! and a per-attempt timeout; the scheduler persists its queue so pending
//! work survives a restart.
//!
//! # Core Concepts
//!
//! - **Priority then FIFO**: higher priority first, submission order within a level
//! - **Bounded Concurrency**: never more than `max-concurrent` jobs running
//! - **Retry with Backoff**: retryable failures re-enter the queue after an exponential delay
//! - **Durable Queue**: every state change writes a snapshot through a `jobstore` backend
//!
//! # Modules
//!
//! - [`domain`] - Job, JobId, Priority and the job lifecycle
//! - [`processor`] - Processor trait, registry and builtin processors
//! - [`scheduler`] - Priority queue, scheduling loop and persistence
//! - [`events`] - Job event bus and JSONL journal
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod domain;
pub mod events;
pub mod processor;
pub mod scheduler;

// Re-export commonly used types
pub use config::Config;
pub use domain::{
    FailureKind, Job, JobFailure, JobFilter, JobId, JobStatus, LogEntry, LogLevel, Priority, SubmitOptions,
    TransitionError,
};
pub use events::{EventBus, EventLogger, EventSubscription, JobEvent, JobEventKind};
pub use processor::{FnProcessor, JobContext, Processor, ProcessorError, ProcessorRegistry};
pub use scheduler::{
    BackoffConfig, PersistedState, QueueStatus, Scheduler, SchedulerConfig, SchedulerError, SchedulerStats,
};
