//! Messages pushed to viewers
//!
//! Wire shape: `{"type": "...", "timestamp": "...", "data": {...}}`.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{ConnectorMetrics, ConnectorStatus, GatewayError};

/// Envelope for every frame a viewer receives
#[derive(Debug, Clone, Serialize)]
pub struct ViewerMessage {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: ViewerPayload,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ViewerPayload {
    Status(StatusData),
    ChargingData(ChargingData),
    Error(ErrorData),
    Heartbeat(HeartbeatData),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusData {
    pub charge_point_id: String,
    pub connector_id: u32,
    /// Connector status, or a charge point state such as `ONLINE`
    pub status: String,
    pub is_online: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Live telemetry derived from a connector's metrics
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingData {
    pub connector_id: u32,
    pub status: Option<ConnectorStatus>,
    pub charging_percentage: Option<f64>,
    pub current_power: Option<f64>,
    pub current_meter: Option<f64>,
    pub energy_delivered: f64,
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub transaction_id: Option<i32>,
    pub start_time: Option<DateTime<Utc>>,
    /// Seconds since the transaction started
    pub duration: Option<i64>,
    pub last_meter_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorData {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatData {
    pub server_time: DateTime<Utc>,
    pub active_subscription_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charge_point_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

impl ViewerMessage {
    fn now(payload: ViewerPayload) -> Self {
        Self {
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn status(
        charge_point_id: &str,
        connector_id: u32,
        status: impl Into<String>,
        is_online: bool,
        message: Option<String>,
    ) -> Self {
        Self::now(ViewerPayload::Status(StatusData {
            charge_point_id: charge_point_id.to_string(),
            connector_id,
            status: status.into(),
            is_online,
            message,
        }))
    }

    pub fn charging_data(
        connector_id: u32,
        status: Option<ConnectorStatus>,
        metrics: &ConnectorMetrics,
        transaction_id: Option<i32>,
    ) -> Self {
        let now = Utc::now();
        Self::now(ViewerPayload::ChargingData(ChargingData {
            connector_id,
            status,
            charging_percentage: metrics.state_of_charge_percent,
            current_power: metrics.power_kw,
            current_meter: metrics.raw_energy_reading_kwh,
            energy_delivered: metrics.energy_delivered_kwh,
            voltage: metrics.voltage,
            current: metrics.current_amp,
            transaction_id: transaction_id.or(metrics.active_transaction_id),
            start_time: metrics.transaction_started_at,
            duration: metrics
                .transaction_started_at
                .filter(|_| metrics.has_active_transaction())
                .map(|started| now.signed_duration_since(started).num_seconds()),
            last_meter_timestamp: metrics.last_meter_timestamp,
        }))
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>, details: Option<String>) -> Self {
        Self::now(ViewerPayload::Error(ErrorData {
            code: code.into(),
            message: message.into(),
            details,
        }))
    }

    /// Error frame for a rejected subscription
    pub fn from_error(error: &GatewayError, details: Option<String>) -> Self {
        Self::error(error.code(), error.to_string(), details)
    }

    pub fn heartbeat(active_subscription_count: usize) -> Self {
        Self::now(ViewerPayload::Heartbeat(HeartbeatData {
            server_time: Utc::now(),
            active_subscription_count,
            charge_point_id: None,
            last_heartbeat_at: None,
        }))
    }

    /// Heartbeat relayed from a charge point to its viewers
    pub fn charge_point_heartbeat(
        charge_point_id: &str,
        last_heartbeat_at: Option<DateTime<Utc>>,
        active_subscription_count: usize,
    ) -> Self {
        Self::now(ViewerPayload::Heartbeat(HeartbeatData {
            server_time: Utc::now(),
            active_subscription_count,
            charge_point_id: Some(charge_point_id.to_string()),
            last_heartbeat_at,
        }))
    }

    pub fn kind(&self) -> &'static str {
        match self.payload {
            ViewerPayload::Status(_) => "status",
            ViewerPayload::ChargingData(_) => "charging_data",
            ViewerPayload::Error(_) => "error",
            ViewerPayload::Heartbeat(_) => "heartbeat",
        }
    }

    pub fn to_json(&self) -> String {
        // Only plain data and chrono timestamps are serialized here.
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_frame_shape() {
        let msg = ViewerMessage::status("CP1", 2, "Charging", true, None);
        let json: serde_json::Value = serde_json::from_str(&msg.to_json()).unwrap();

        assert_eq!(json["type"], "status");
        assert!(json["timestamp"].is_string());
        assert_eq!(json["data"]["chargePointId"], "CP1");
        assert_eq!(json["data"]["connectorId"], 2);
        assert_eq!(json["data"]["isOnline"], true);
        assert!(json["data"].get("message").is_none());
    }

    #[test]
    fn charging_data_frame_uses_metrics() {
        let metrics = ConnectorMetrics {
            energy_delivered_kwh: 2.5,
            raw_energy_reading_kwh: Some(12.5),
            state_of_charge_percent: Some(48.0),
            power_kw: Some(7.2),
            active_transaction_id: Some(42),
            transaction_started_at: Some(Utc::now()),
            ..ConnectorMetrics::default()
        };
        let msg = ViewerMessage::charging_data(1, Some(ConnectorStatus::Charging), &metrics, None);
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["type"], "charging_data");
        assert_eq!(json["data"]["chargingPercentage"], 48.0);
        assert_eq!(json["data"]["currentPower"], 7.2);
        assert_eq!(json["data"]["currentMeter"], 12.5);
        assert_eq!(json["data"]["energyDelivered"], 2.5);
        assert_eq!(json["data"]["transactionId"], 42);
        assert_eq!(json["data"]["status"], "Charging");
        assert!(json["data"]["duration"].is_number());
    }

    #[test]
    fn error_frame_carries_code() {
        let err = GatewayError::ChargePointNotFound("CP9".into());
        let json = serde_json::to_value(ViewerMessage::from_error(&err, None)).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["data"]["code"], "SESSION_NOT_FOUND");
    }
}
