//! Infrastructure layer - concrete transport adapters

pub mod transport;

pub use transport::{ChannelTransport, TransportFrame};
