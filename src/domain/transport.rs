//! Transport port
//!
//! The registry and the fan-out layer only ever see an opaque handle to a
//! bidirectional connection. Framing and socket I/O live behind it.

use std::fmt;
use std::sync::Arc;

use super::error::GatewayResult;

/// WebSocket close codes used by the gateway
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const POLICY_VIOLATION: u16 = 1008;
}

/// Handle to an outbound connection.
///
/// Implementations must never block: a send either queues the payload or
/// fails immediately.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Whether the underlying connection still accepts frames.
    fn is_open(&self) -> bool;

    /// Queue a text payload.
    fn send(&self, message: String) -> GatewayResult<()>;

    /// Close the connection. Closing twice is a no-op.
    fn close(&self, code: u16, reason: &str);
}

/// Shared transport handle
pub type SharedTransport = Arc<dyn Transport>;
