//! Transport adapters

pub mod channel;

pub use channel::{ChannelTransport, CloseSignal, TransportFrame};
