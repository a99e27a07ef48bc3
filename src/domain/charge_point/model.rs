//! Charge point session entities

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::metering::ConnectorMetrics;
use crate::domain::transport::SharedTransport;

/// Connector status as reported by StatusNotification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectorStatus {
    Available,
    Preparing,
    Charging,
    SuspendedEVSE,
    SuspendedEV,
    Finishing,
    Reserved,
    Unavailable,
    Faulted,
}

impl ConnectorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "Available",
            Self::Preparing => "Preparing",
            Self::Charging => "Charging",
            Self::SuspendedEVSE => "SuspendedEVSE",
            Self::SuspendedEV => "SuspendedEV",
            Self::Finishing => "Finishing",
            Self::Reserved => "Reserved",
            Self::Unavailable => "Unavailable",
            Self::Faulted => "Faulted",
        }
    }
}

impl fmt::Display for ConnectorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectorStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "available" => Ok(Self::Available),
            "preparing" => Ok(Self::Preparing),
            "charging" => Ok(Self::Charging),
            "suspendedevse" => Ok(Self::SuspendedEVSE),
            "suspendedev" => Ok(Self::SuspendedEV),
            "finishing" => Ok(Self::Finishing),
            "reserved" => Ok(Self::Reserved),
            "unavailable" => Ok(Self::Unavailable),
            "faulted" => Ok(Self::Faulted),
            other => Err(format!("unknown connector status: {}", other)),
        }
    }
}

/// State of one physical connector
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorState {
    pub connector_id: u32,
    pub connector_type: Option<String>,
    pub max_current: Option<f64>,
    /// `None` until the charge point reports a status for this connector
    pub status: Option<ConnectorStatus>,
    pub error_code: Option<String>,
    pub metrics: Option<ConnectorMetrics>,
}

impl ConnectorState {
    pub fn new(connector_id: u32) -> Self {
        Self {
            connector_id,
            connector_type: None,
            max_current: None,
            status: None,
            error_code: None,
            metrics: None,
        }
    }

    pub fn metrics_mut(&mut self) -> &mut ConnectorMetrics {
        self.metrics.get_or_insert_with(ConnectorMetrics::default)
    }

    /// Merge type/max-current details; blank types are ignored.
    pub fn merge_details(&mut self, connector_type: Option<&str>, max_current: Option<f64>) {
        if let Some(kind) = connector_type.map(str::trim).filter(|t| !t.is_empty()) {
            self.connector_type = Some(kind.to_string());
        }
        if let Some(max) = max_current.filter(|m| m.is_finite()) {
            self.max_current = Some(max);
        }
    }
}

/// Connector description delivered by a configuration/inventory sync
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorDescriptor {
    pub connector_id: u32,
    #[serde(default, rename = "type")]
    pub connector_type: Option<String>,
    #[serde(default)]
    pub max_current: Option<f64>,
    #[serde(default)]
    pub status: Option<ConnectorStatus>,
}

impl ConnectorDescriptor {
    pub fn new(connector_id: u32) -> Self {
        Self {
            connector_id,
            ..Default::default()
        }
    }
}

/// Outbound message waiting for an acknowledgement
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMessage {
    pub message_id: String,
    pub payload: String,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
}

/// A charge point with an identified, live transport
#[derive(Debug)]
pub struct ChargePointConnection {
    pub charge_point_id: String,
    pub serial_number: String,
    pub transport: SharedTransport,
    pub is_authenticated: bool,
    pub connected_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub protocol_version: String,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub pending_messages: Vec<PendingMessage>,
    /// Connector `n` at index `n - 1`, always covers `1..=connector_count`
    pub connectors: Vec<ConnectorState>,
    pub connector_count: u32,
    /// Active transaction id -> connector id
    transactions: HashMap<i32, u32>,
}

impl ChargePointConnection {
    pub fn new(
        charge_point_id: impl Into<String>,
        serial_number: impl Into<String>,
        transport: SharedTransport,
        protocol_version: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            charge_point_id: charge_point_id.into(),
            serial_number: serial_number.into(),
            transport,
            is_authenticated: false,
            connected_at: now,
            last_seen_at: now,
            last_heartbeat_at: now,
            protocol_version: protocol_version.into(),
            messages_sent: 0,
            messages_received: 0,
            pending_messages: Vec::new(),
            connectors: Vec::new(),
            connector_count: 0,
            transactions: HashMap::new(),
        }
    }

    pub fn connector(&self, connector_id: u32) -> Option<&ConnectorState> {
        let idx = (connector_id as usize).checked_sub(1)?;
        self.connectors.get(idx)
    }

    pub fn connector_exists(&self, connector_id: u32) -> bool {
        connector_id >= 1 && connector_id <= self.connector_count
    }

    /// Get a connector, creating it (and any lower-numbered gaps) if needed.
    /// Callers reject connector 0 and ids above their configured maximum.
    pub fn ensure_connector(&mut self, connector_id: u32) -> &mut ConnectorState {
        debug_assert!(connector_id >= 1, "connector ids are 1-based");
        self.recompute_connector_count(Some(connector_id));
        let idx = (connector_id as usize).saturating_sub(1);
        &mut self.connectors[idx]
    }

    /// `count = max(declared, previous)`; fills `1..=count` in place, so the
    /// connector with id `n` always lives at index `n - 1`.
    pub fn recompute_connector_count(&mut self, declared: Option<u32>) {
        let count = declared.unwrap_or(0).max(self.connector_count);
        let len = self.connectors.len() as u32;
        if count > len {
            let mut next = len;
            self.connectors.resize_with(count as usize, || {
                next += 1;
                ConnectorState::new(next)
            });
        }
        self.connector_count = count;
    }

    /// Connector currently holding `transaction_id`.
    pub fn connector_for_transaction(&self, transaction_id: i32) -> Option<u32> {
        self.transactions.get(&transaction_id).copied()
    }

    /// Point `transaction_id` at `connector_id`, detaching it from any other
    /// connector so that at most one connector holds a given transaction.
    /// Returns the connector the id was taken from, if any.
    pub fn bind_transaction(&mut self, transaction_id: i32, connector_id: u32) -> Option<u32> {
        let previous = self.transactions.insert(transaction_id, connector_id);
        let displaced = previous.filter(|&prev| prev != connector_id);
        if let Some(prev) = displaced {
            if let Some(metrics) = (prev as usize)
                .checked_sub(1)
                .and_then(|idx| self.connectors.get_mut(idx))
                .and_then(|c| c.metrics.as_mut())
            {
                if metrics.active_transaction_id == Some(transaction_id) {
                    metrics.active_transaction_id = None;
                    metrics.transaction_started_at = None;
                    metrics.transaction_id_tag = None;
                }
            }
        }
        displaced
    }

    pub fn unbind_transaction(&mut self, transaction_id: i32) -> Option<u32> {
        self.transactions.remove(&transaction_id)
    }

    /// Drop every index entry that points at `connector_id`.
    pub fn unbind_connector(&mut self, connector_id: u32) {
        self.transactions.retain(|_, c| *c != connector_id);
    }

    pub fn active_transaction_count(&self) -> usize {
        self.transactions.len()
    }

    /// Serializable copy without the transport handle.
    pub fn details(&self) -> ChargePointDetails {
        ChargePointDetails {
            charge_point_id: self.charge_point_id.clone(),
            serial_number: self.serial_number.clone(),
            protocol_version: self.protocol_version.clone(),
            is_authenticated: self.is_authenticated,
            transport_open: self.transport.is_open(),
            connected_at: self.connected_at,
            last_seen_at: self.last_seen_at,
            last_heartbeat_at: self.last_heartbeat_at,
            messages_sent: self.messages_sent,
            messages_received: self.messages_received,
            pending_messages: self.pending_messages.len(),
            connector_count: self.connector_count,
            connectors: self.connectors.clone(),
        }
    }
}

/// Read-only dump of a charge point for administrative callers
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargePointDetails {
    pub charge_point_id: String,
    pub serial_number: String,
    pub protocol_version: String,
    pub is_authenticated: bool,
    pub transport_open: bool,
    pub connected_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub pending_messages: usize,
    pub connector_count: u32,
    pub connectors: Vec<ConnectorState>,
}

// ── Tests ──────────────────────────────────────────────────────
