//! Application services

pub mod gateway;
pub mod health_monitor;
pub mod liveness;

pub use gateway::{GatewayService, GatewaySettings, GatewayStats, SharedGatewayService};
pub use health_monitor::{ChargePointHealth, HealthConfig, HealthMonitor, HealthReport, HealthStatus};
pub use liveness::{
    LivenessConfig, LivenessValidator, ProbeOutcome, SharedLivenessValidator, ValidationResult,
    ValidationStats,
};
