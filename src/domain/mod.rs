//! Domain layer: session entities, metering rules, errors and the transport port

pub mod charge_point;
pub mod error;
pub mod metering;
pub mod transport;

pub use charge_point::{
    ChargePointConnection, ChargePointDetails, ConnectorDescriptor, ConnectorState,
    ConnectorStatus, PendingMessage,
};
pub use error::{GatewayError, GatewayResult};
pub use metering::{ConnectorMetrics, MeterSample, MeterValue, TransactionStart, TransactionStop};
pub use transport::{close_code, SharedTransport, Transport};
