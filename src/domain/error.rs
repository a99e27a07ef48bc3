//! Gateway error taxonomy
//!
//! Every fallible registry, liveness or fan-out operation returns one of
//! these. None of them is fatal for the process; callers log and move on.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("Charge point {0} is already registered")]
    DuplicateChargePoint(String),

    #[error("Charge point {0} not found")]
    ChargePointNotFound(String),

    #[error("Connector {connector_id} not found on charge point {charge_point_id}")]
    ConnectorNotFound {
        charge_point_id: String,
        connector_id: u32,
    },

    #[error("Invalid connector id: {0}")]
    InvalidConnectorId(u32),

    #[error("Charge point {charge_point_id} is offline: {reason}")]
    ChargePointOffline {
        charge_point_id: String,
        reason: String,
    },

    #[error("Subscription {0} not found")]
    SubscriptionNotFound(String),

    #[error("Transport is closed")]
    TransportClosed,

    #[error("Transport buffer is full")]
    TransportBackpressure,

    #[error("Offline probing exhausted for {0}")]
    ProbeExhausted(String),
}

impl GatewayError {
    /// Machine-readable code sent to viewers inside `error` messages.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateChargePoint(_) => "DUPLICATE_CHARGE_POINT",
            Self::ChargePointNotFound(_) => "SESSION_NOT_FOUND",
            Self::ConnectorNotFound { .. } => "CONNECTOR_NOT_FOUND",
            Self::InvalidConnectorId(_) => "INVALID_CONNECTOR",
            Self::ChargePointOffline { .. } => "CHARGE_POINT_OFFLINE",
            Self::SubscriptionNotFound(_) => "SUBSCRIPTION_NOT_FOUND",
            Self::TransportClosed => "TRANSPORT_CLOSED",
            Self::TransportBackpressure => "TRANSPORT_BACKPRESSURE",
            Self::ProbeExhausted(_) => "PROBE_EXHAUSTED",
        }
    }

    /// Whether the failure came from the transport rather than from state.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::TransportClosed | Self::TransportBackpressure)
    }
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_viewer_contract() {
        assert_eq!(
            GatewayError::ChargePointNotFound("CP1".into()).code(),
            "SESSION_NOT_FOUND"
        );
        assert_eq!(
            GatewayError::ChargePointOffline {
                charge_point_id: "CP1".into(),
                reason: "stale".into()
            }
            .code(),
            "CHARGE_POINT_OFFLINE"
        );
        assert!(GatewayError::TransportClosed.is_transport());
        assert!(!GatewayError::InvalidConnectorId(0).is_transport());
    }

    #[test]
    fn display_includes_ids() {
        let err = GatewayError::ConnectorNotFound {
            charge_point_id: "CP9".into(),
            connector_id: 4,
        };
        assert_eq!(err.to_string(), "Connector 4 not found on charge point CP9");
    }
}
