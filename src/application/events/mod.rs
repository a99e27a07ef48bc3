//! Registry change notifications (pub/sub)

pub mod event_bus;
pub mod types;

pub use event_bus::{create_event_bus, EventBus, EventSubscriber, SharedEventBus};
pub use types::{
    ChargePointAddedEvent, ChargePointChange, ChargePointRemovedEvent, ChargePointUpdatedEvent,
    EventMessage, RegistryEvent, RemovalReason,
};
