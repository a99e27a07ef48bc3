//! Network-facing adapters: viewer WebSocket and HTTP endpoints

pub mod http;
pub mod ws;
