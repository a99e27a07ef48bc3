//! Real-time fan-out of registry changes to viewers

pub mod hub;
pub mod messages;
pub mod subscription;

pub use hub::{FanOut, FanOutConfig, FanOutStats, SharedFanOut};
pub use messages::{ViewerMessage, ViewerPayload};
pub use subscription::{SubscriptionInfo, ViewerSubscription};
