//! Processor system for JobDaemon
//!
//! A processor executes jobs of one type. The scheduler looks processors up
//! by job type at admission and hands each attempt a [`JobContext`] for
//! progress, logging and cancellation.

mod builtin;
mod context;
mod error;
mod registry;
mod traits;

pub use builtin::{EchoProcessor, FailProcessor, SleepProcessor};
pub use context::{DetachedReporter, JobContext, ProgressReporter};
pub use error::ProcessorError;
pub use registry::ProcessorRegistry;
pub use traits::{FnProcessor, Processor};
