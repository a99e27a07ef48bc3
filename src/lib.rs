//! # Charge Gateway
//!
//! Session core of a charge-point gateway: tracks connected charging
//! stations, judges their liveness, aggregates meter telemetry per
//! connector, and fans live updates out to WebSocket viewers.
//!
//! ## Architecture
//!
//! - **domain**: connection and connector entities, metering rules, errors, the transport port
//! - **application**: session registry, event bus, liveness validator, health monitor, viewer fan-out
//! - **infrastructure**: channel-backed transport used by the WebSocket layer
//! - **interfaces**: viewer WebSocket endpoint, health and Prometheus routes
//! - **server**: lifecycle of a running gateway
//! - **support**: graceful shutdown

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interfaces;
pub mod server;
pub mod support;

pub use config::{default_config_path, AppConfig};

pub use application::{GatewayService, SharedGatewayService};
pub use domain::{GatewayError, GatewayResult};
pub use server::{init_tracing, ServerHandle, ServerOptions};
