//! Connector metrics engine
//!
//! Pure functions turning raw meter samples and transaction lifecycle events
//! into [`ConnectorMetrics`]. No I/O, no clock reads: callers pass `now`.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::model::{ConnectorMetrics, Measurand, MeterValue};

/// Parameters of a StartTransaction event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionStart {
    pub transaction_id: i32,
    pub id_tag: Option<String>,
    /// Meter register at start, in Wh
    pub meter_start: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
}

impl TransactionStart {
    pub fn new(transaction_id: i32) -> Self {
        Self {
            transaction_id,
            ..Default::default()
        }
    }

    pub fn with_id_tag(mut self, id_tag: impl Into<String>) -> Self {
        self.id_tag = Some(id_tag.into());
        self
    }

    pub fn with_meter_start(mut self, meter_start: i64) -> Self {
        self.meter_start = Some(meter_start);
        self
    }

    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = Some(started_at);
        self
    }
}

/// Parameters of a StopTransaction event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionStop {
    pub transaction_id: i32,
    /// Meter register at stop, in Wh
    pub meter_stop: Option<i64>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl TransactionStop {
    pub fn new(transaction_id: i32) -> Self {
        Self {
            transaction_id,
            ..Default::default()
        }
    }

    pub fn with_meter_stop(mut self, meter_stop: i64) -> Self {
        self.meter_stop = Some(meter_stop);
        self
    }

    pub fn with_stopped_at(mut self, stopped_at: DateTime<Utc>) -> Self {
        self.stopped_at = Some(stopped_at);
        self
    }
}

/// Convert an energy reading to kWh. Only an explicit `Wh` unit is scaled.
pub fn to_kwh(value: f64, unit: Option<&str>) -> f64 {
    match unit.map(|u| u.trim().to_lowercase()) {
        Some(u) if u == "wh" => value / 1000.0,
        _ => value,
    }
}

/// Convert a power reading to kW. Only an explicit `W` unit is scaled.
pub fn to_kw(value: f64, unit: Option<&str>) -> f64 {
    match unit.map(|u| u.trim().to_lowercase()) {
        Some(u) if u == "w" => value / 1000.0,
        _ => value,
    }
}

/// Record a new energy register reading.
///
/// The first reading ever seen becomes the baseline; delivered energy is the
/// clamped difference between the latest reading and that baseline.
pub fn update_energy(metrics: &mut ConnectorMetrics, value: f64, unit: Option<&str>) {
    let kwh = to_kwh(value, unit);
    metrics.raw_energy_reading_kwh = Some(kwh);
    let baseline = *metrics.energy_baseline_kwh.get_or_insert(kwh);
    metrics.energy_delivered_kwh = (kwh - baseline).max(0.0);
}

/// Apply a MeterValues batch.
///
/// Bad samples (unparsable value, unknown measurand) are skipped one by one.
/// Returns `true` when anything in `metrics` changed.
pub fn apply_meter_samples(
    metrics: &mut ConnectorMetrics,
    meter_values: &[MeterValue],
    transaction_id: Option<i32>,
    now: DateTime<Utc>,
) -> bool {
    let mut updated = false;
    let mut latest = metrics.last_meter_timestamp;

    for meter_value in meter_values {
        match meter_value.parsed_timestamp() {
            Some(ts) if latest.map_or(true, |l| ts > l) => latest = Some(ts),
            Some(_) => {}
            None => debug!(timestamp = %meter_value.timestamp, "Skipping unparsable meter timestamp"),
        }

        for sample in &meter_value.sampled_value {
            let Some(value) = sample.numeric_value() else {
                debug!(value = %sample.value, "Skipping non-numeric meter sample");
                continue;
            };

            match sample.measurand() {
                Measurand::EnergyActiveImportRegister => {
                    update_energy(metrics, value, sample.unit.as_deref());
                }
                Measurand::SoC => metrics.state_of_charge_percent = Some(value),
                Measurand::PowerActiveImport => {
                    metrics.power_kw = Some(to_kw(value, sample.unit.as_deref()));
                }
                Measurand::CurrentImport | Measurand::CurrentExport | Measurand::CurrentOffered => {
                    metrics.current_amp = Some(value);
                }
                Measurand::Voltage => metrics.voltage = Some(value),
                Measurand::Unsupported => continue,
            }
            updated = true;
        }
    }

    if latest.is_some() {
        metrics.last_meter_timestamp = latest;
        updated = true;
    }

    if let Some(tx_id) = transaction_id {
        if metrics.active_transaction_id != Some(tx_id) {
            metrics.active_transaction_id = Some(tx_id);
            updated = true;
        }
        if metrics.transaction_started_at.is_none() {
            metrics.transaction_started_at = Some(latest.unwrap_or(now));
            updated = true;
        }
    }

    updated
}

/// Begin a transaction, re-basing delivered energy on `meter_start` when given.
pub fn start_transaction(metrics: &mut ConnectorMetrics, start: &TransactionStart, now: DateTime<Utc>) {
    metrics.active_transaction_id = Some(start.transaction_id);
    metrics.transaction_id_tag = start.id_tag.clone();

    if let Some(meter_start) = start.meter_start {
        let kwh = meter_start as f64 / 1000.0;
        metrics.meter_start = Some(meter_start);
        metrics.energy_baseline_kwh = Some(kwh);
        metrics.raw_energy_reading_kwh = Some(kwh);
        metrics.energy_delivered_kwh = 0.0;
    }

    let started_at = start.started_at.unwrap_or(now);
    metrics.transaction_started_at = Some(started_at);
    advance_meter_timestamp(metrics, started_at);
    metrics.last_transaction_completed_at = None;
}

/// Finish a transaction. No-op returning `false` unless the id is the active one.
pub fn stop_transaction(metrics: &mut ConnectorMetrics, stop: &TransactionStop, now: DateTime<Utc>) -> bool {
    if metrics.active_transaction_id != Some(stop.transaction_id) {
        return false;
    }

    let stopped_at = stop.stopped_at.unwrap_or(now);
    metrics.last_transaction_completed_at = Some(stopped_at);
    advance_meter_timestamp(metrics, stopped_at);

    if let Some(meter_stop) = stop.meter_stop {
        let kwh = meter_stop as f64 / 1000.0;
        metrics.raw_energy_reading_kwh = Some(kwh);
        let baseline = *metrics.energy_baseline_kwh.get_or_insert(kwh);
        metrics.energy_delivered_kwh = (kwh - baseline).max(0.0);
    }

    metrics.active_transaction_id = None;
    metrics.transaction_started_at = None;
    metrics.transaction_id_tag = None;
    metrics.meter_start = None;
    true
}

/// Administrative reset: zero derived values and drop any in-flight transaction.
pub fn reset_metrics(metrics: &mut ConnectorMetrics, now: DateTime<Utc>) {
    *metrics = ConnectorMetrics {
        last_meter_timestamp: Some(now),
        energy_delivered_kwh: 0.0,
        state_of_charge_percent: Some(0.0),
        power_kw: Some(0.0),
        meter_start: Some(0),
        ..Default::default()
    };
}

fn advance_meter_timestamp(metrics: &mut ConnectorMetrics, ts: DateTime<Utc>) {
    if metrics.last_meter_timestamp.map_or(true, |prev| ts > prev) {
        metrics.last_meter_timestamp = Some(ts);
    }
}

// ── Tests ──────────────────────────────────────────────────────
