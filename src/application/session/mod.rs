//! Charge point session registry

pub mod registry;

pub use registry::{GatewayRegistry, RegistryConfig, RegistryStats, SessionSnapshot, SharedGatewayRegistry};
