pub mod events;
pub mod fanout;
pub mod services;
pub mod session;

// Re-export key types for convenience
pub use events::{create_event_bus, EventBus, EventMessage, EventSubscriber, RegistryEvent, SharedEventBus};
pub use fanout::{FanOut, FanOutConfig, SharedFanOut, ViewerMessage};
pub use services::{
    GatewayService, GatewaySettings, HealthConfig, HealthMonitor, LivenessConfig, LivenessValidator,
    SharedGatewayService,
};
pub use session::{GatewayRegistry, SharedGatewayRegistry};
