//! Registry change events
//!
//! Registry mutations that viewers care about publish one of these. Consumers
//! (fan-out, tests, future audit sinks) match on the variant instead of
//! string event names.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{ConnectorMetrics, ConnectorStatus};

/// Change notification emitted by the registry
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RegistryEvent {
    /// Charge point identified and registered
    Added(ChargePointAddedEvent),
    /// Charge point removed (disconnect, admin removal or stale eviction)
    Removed(ChargePointRemovedEvent),
    /// Something about an existing charge point changed
    Updated(ChargePointUpdatedEvent),
}

impl RegistryEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            RegistryEvent::Added(_) => "added",
            RegistryEvent::Removed(_) => "removed",
            RegistryEvent::Updated(e) => e.change.kind(),
        }
    }

    pub fn charge_point_id(&self) -> &str {
        match self {
            RegistryEvent::Added(e) => &e.charge_point_id,
            RegistryEvent::Removed(e) => &e.charge_point_id,
            RegistryEvent::Updated(e) => &e.charge_point_id,
        }
    }

    /// Connector the event is scoped to, `None` for charge-point-level events.
    pub fn connector_id(&self) -> Option<u32> {
        match self {
            RegistryEvent::Updated(e) => e.change.connector_id(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargePointAddedEvent {
    pub charge_point_id: String,
    pub serial_number: String,
    pub protocol_version: String,
    pub timestamp: DateTime<Utc>,
}

/// Why a charge point left the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    Disconnected,
    Administrative,
    Stale,
}

impl RemovalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Administrative => "administrative",
            Self::Stale => "stale",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargePointRemovedEvent {
    pub charge_point_id: String,
    pub reason: RemovalReason,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargePointUpdatedEvent {
    pub charge_point_id: String,
    pub timestamp: DateTime<Utc>,
    pub change: ChargePointChange,
}

/// Subtype of an `Updated` event together with its payload
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ChargePointChange {
    #[serde(rename_all = "camelCase")]
    LastSeen { last_seen_at: DateTime<Utc> },
    #[serde(rename_all = "camelCase")]
    Heartbeat { last_heartbeat_at: DateTime<Utc> },
    #[serde(rename_all = "camelCase")]
    Authentication { is_authenticated: bool },
    #[serde(rename_all = "camelCase")]
    ConnectorStatus {
        connector_id: u32,
        status: ConnectorStatus,
        error_code: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ConnectorMetrics {
        connector_id: u32,
        metrics: ConnectorMetrics,
        transaction_id: Option<i32>,
    },
}

impl ChargePointChange {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LastSeen { .. } => "lastSeen",
            Self::Heartbeat { .. } => "heartbeat",
            Self::Authentication { .. } => "authentication",
            Self::ConnectorStatus { .. } => "connectorStatus",
            Self::ConnectorMetrics { .. } => "connectorMetrics",
        }
    }

    pub fn connector_id(&self) -> Option<u32> {
        match self {
            Self::ConnectorStatus { connector_id, .. }
            | Self::ConnectorMetrics { connector_id, .. } => Some(*connector_id),
            _ => None,
        }
    }
}

/// Envelope carried on the bus
#[derive(Debug, Clone, Serialize)]
pub struct EventMessage {
    pub id: String,
    /// Per-bus publish sequence, strictly increasing
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: RegistryEvent,
}

impl EventMessage {
    pub fn new(sequence: u64, event: RegistryEvent) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sequence,
            timestamp: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn updated_event_exposes_connector_scope() {
        let event = RegistryEvent::Updated(ChargePointUpdatedEvent {
            charge_point_id: "CP1".into(),
            timestamp: Utc::now(),
            change: ChargePointChange::ConnectorStatus {
                connector_id: 2,
                status: ConnectorStatus::Charging,
                error_code: None,
            },
        });
        assert_eq!(event.event_type(), "connectorStatus");
        assert_eq!(event.charge_point_id(), "CP1");
        assert_eq!(event.connector_id(), Some(2));
    }

    #[test]
    fn serializes_with_type_and_kind_tags() {
        let event = RegistryEvent::Updated(ChargePointUpdatedEvent {
            charge_point_id: "CP1".into(),
            timestamp: Utc::now(),
            change: ChargePointChange::Authentication {
                is_authenticated: true,
            },
        });
        let json = serde_json::to_value(EventMessage::new(1, event)).unwrap();
        assert_eq!(json["type"], "updated");
        assert_eq!(json["data"]["chargePointId"], "CP1");
        assert_eq!(json["data"]["change"]["kind"], "authentication");
        assert_eq!(json["data"]["change"]["isAuthenticated"], true);
    }
}
