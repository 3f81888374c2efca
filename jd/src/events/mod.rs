//! Event system for job lifecycle streaming
//!
//! The scheduler emits a [`JobEvent`] for every state change. Consumers
//! subscribe through the [`EventBus`]; the [`EventLogger`] keeps a JSONL
//! journal of everything it sees.

mod bus;
mod logger;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventSubscription};
pub use logger::{EventLogger, read_journal, spawn_event_logger};
pub use types::{JobEvent, JobEventKind};
