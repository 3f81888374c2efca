//! Event Bus - pub/sub for job lifecycle events
//!
//! Uses a tokio broadcast channel. The scheduler emits; consumers (CLI
//! watchers, the journal logger, tests) subscribe.

use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::types::{JobEvent, JobEventKind};

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Broadcast bus for job events; cheap to clone
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<JobEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Emit an event to all subscribers
    ///
    /// Fire-and-forget: with no subscribers the event is dropped, and a slow
    /// subscriber loses the oldest events.
    pub fn emit(&self, event: JobEvent) {
        debug!(kind = %event.kind, job_id = %event.job.id, "EventBus::emit");
        let _ = self.tx.send(event);
    }

    /// Receive every event emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        debug!("EventBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Receive only the given kinds; an empty list means all
    pub fn subscribe_to(&self, kinds: &[JobEventKind]) -> EventSubscription {
        debug!(?kinds, "EventBus::subscribe_to: new filtered subscriber");
        EventSubscription {
            rx: self.tx.subscribe(),
            kinds: kinds.to_vec(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

/// Filtered receiver that rides over lag
pub struct EventSubscription {
    rx: broadcast::Receiver<JobEvent>,
    kinds: Vec<JobEventKind>,
}

impl EventSubscription {
    /// Next matching event, or None once the bus is gone
    pub async fn recv(&mut self) -> Option<JobEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.kinds.is_empty() || self.kinds.contains(&event.kind) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "EventSubscription: lagged behind, missed events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
