//! Event bus carrying registry change notifications
//!
//! Uses a tokio broadcast channel. Publishing never blocks, so the registry
//! can publish while still holding a charge point's entry lock.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::types::{EventMessage, RegistryEvent};

const DEFAULT_CAPACITY: usize = 1024;

/// Broadcast bus for [`RegistryEvent`]s
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventMessage>,
    subscriber_count: Arc<AtomicUsize>,
    sequence: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            subscriber_count: Arc::new(AtomicUsize::new(0)),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn publish(&self, event: RegistryEvent) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let message = EventMessage::new(sequence, event);
        let event_type = message.event.event_type();
        let charge_point_id = message.event.charge_point_id().to_string();

        match self.sender.send(message) {
            Ok(count) => {
                debug!(event_type, %charge_point_id, sequence, subscribers = count, "Event published");
            }
            Err(_) => {
                debug!(event_type, %charge_point_id, sequence, "Event published (no subscribers)");
            }
        }
    }

    pub fn subscribe(&self) -> EventSubscriber {
        let receiver = self.sender.subscribe();
        let count = self.subscriber_count.fetch_add(1, Ordering::SeqCst) + 1;
        info!(subscribers = count, "New event subscriber");

        EventSubscriber {
            receiver,
            subscriber_count: self.subscriber_count.clone(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count.load(Ordering::SeqCst)
    }

    /// Number of events published so far
    pub fn published(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of the bus
pub struct EventSubscriber {
    receiver: broadcast::Receiver<EventMessage>,
    subscriber_count: Arc<AtomicUsize>,
}

impl EventSubscriber {
    /// Next event; `None` once every sender is gone. Lagged gaps are logged and skipped.
    pub async fn recv(&mut self) -> Option<EventMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(missed = count, "Event subscriber lagged");
                    metrics::counter!("gateway_events_lagged_total").increment(count);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant used by tests and drain loops.
    pub fn try_recv(&mut self) -> Option<EventMessage> {
        loop {
            match self.receiver.try_recv() {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    warn!(missed = count, "Event subscriber lagged");
                    continue;
                }
                Err(_) => return None,
            }
        }
    }
}

impl Drop for EventSubscriber {
    fn drop(&mut self) {
        let prev = self.subscriber_count.fetch_sub(1, Ordering::SeqCst);
        debug!(remaining = prev.saturating_sub(1), "Event subscriber dropped");
    }
}

/// Shared event bus type
pub type SharedEventBus = Arc<EventBus>;

/// Create a shared event bus
pub fn create_event_bus(capacity: usize) -> SharedEventBus {
    Arc::new(EventBus::with_capacity(capacity))
}
