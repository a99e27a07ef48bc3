//! Meter sample and connector metrics types

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One timestamped batch of sampled values, as carried by MeterValues
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterValue {
    /// ISO-8601 timestamp as reported by the charge point
    pub timestamp: String,
    #[serde(default)]
    pub sampled_value: Vec<MeterSample>,
}

impl MeterValue {
    pub fn new(timestamp: impl Into<String>, sampled_value: Vec<MeterSample>) -> Self {
        Self {
            timestamp: timestamp.into(),
            sampled_value,
        }
    }

    /// Parsed timestamp, `None` when the charge point sent garbage.
    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(self.timestamp.trim())
            .ok()
            .map(|ts| ts.with_timezone(&Utc))
    }
}

/// A single sampled value. The value stays a string until it is applied,
/// so one malformed entry cannot reject the whole batch at decode time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterSample {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl MeterSample {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn with_measurand(mut self, measurand: impl Into<String>) -> Self {
        self.measurand = Some(measurand.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Numeric value, `None` for non-finite or unparsable input.
    pub fn numeric_value(&self) -> Option<f64> {
        self.value
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
    }

    /// Measurand classification. A missing measurand means the energy register.
    pub fn measurand(&self) -> Measurand {
        match self.measurand.as_deref() {
            None => Measurand::EnergyActiveImportRegister,
            Some(raw) => raw.parse().unwrap_or(Measurand::Unsupported),
        }
    }
}

/// Measurands the engine understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Measurand {
    EnergyActiveImportRegister,
    SoC,
    PowerActiveImport,
    CurrentImport,
    CurrentExport,
    CurrentOffered,
    Voltage,
    Unsupported,
}

impl FromStr for Measurand {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "energy.active.import.register" => Ok(Self::EnergyActiveImportRegister),
            "soc" => Ok(Self::SoC),
            "power.active.import" => Ok(Self::PowerActiveImport),
            "current.import" => Ok(Self::CurrentImport),
            "current.export" => Ok(Self::CurrentExport),
            "current.offered" => Ok(Self::CurrentOffered),
            "voltage" => Ok(Self::Voltage),
            _ => Err(()),
        }
    }
}

/// Normalized per-connector telemetry and transaction state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorMetrics {
    pub last_meter_timestamp: Option<DateTime<Utc>>,
    /// Energy delivered in the current session, never negative
    pub energy_delivered_kwh: f64,
    pub energy_baseline_kwh: Option<f64>,
    pub raw_energy_reading_kwh: Option<f64>,
    pub state_of_charge_percent: Option<f64>,
    pub power_kw: Option<f64>,
    pub voltage: Option<f64>,
    pub current_amp: Option<f64>,
    pub active_transaction_id: Option<i32>,
    pub transaction_started_at: Option<DateTime<Utc>>,
    pub transaction_id_tag: Option<String>,
    /// Meter register at transaction start, in Wh
    pub meter_start: Option<i64>,
    pub last_transaction_completed_at: Option<DateTime<Utc>>,
}

impl ConnectorMetrics {
    pub fn has_active_transaction(&self) -> bool {
        self.active_transaction_id.is_some()
    }
}
