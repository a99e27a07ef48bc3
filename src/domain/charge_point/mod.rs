//! Charge point connection aggregate

pub mod model;

pub use model::{
    ChargePointConnection, ChargePointDetails, ConnectorDescriptor, ConnectorState,
    ConnectorStatus, PendingMessage,
};
