//! HTTP interfaces
//!
//! - `modules::health`: `GET /health` summary
//! - `modules::metrics`: `GET /metrics` and request metrics middleware
//! - `router`: assembles these with the viewer WebSocket route

pub mod modules;
pub mod router;

pub use router::create_router;
