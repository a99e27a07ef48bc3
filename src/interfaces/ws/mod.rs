//! WebSocket interfaces
//!
//! - `viewer`: live status and telemetry stream for one connector

pub mod viewer;

pub use viewer::{ws_viewer_handler, ViewerState};
