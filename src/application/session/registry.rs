//! Gateway registry: live charge point sessions and their connector state
//!
//! Backed by a `DashMap`, so every mutation runs under the entry's write
//! guard. Change events are published before that guard is released, which
//! keeps per-charge-point event order identical to mutation order.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::application::events::{
    ChargePointAddedEvent, ChargePointChange, ChargePointRemovedEvent, ChargePointUpdatedEvent,
    RegistryEvent, RemovalReason, SharedEventBus,
};
use crate::domain::metering::engine;
use crate::domain::{
    close_code, ChargePointConnection, ChargePointDetails, ConnectorDescriptor, ConnectorState,
    ConnectorStatus, GatewayError, GatewayResult, MeterValue, PendingMessage, SharedTransport,
    TransactionStart, TransactionStop,
};

/// Registry limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Highest connector id a charge point may report; larger ids are rejected
    pub max_connector_id: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { max_connector_id: 100 }
    }
}

/// Read-only view of the fields liveness and health checks need
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub charge_point_id: String,
    pub transport_open: bool,
    pub is_authenticated: bool,
    pub connected_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub connector_count: u32,
    pub messages_sent: u64,
    pub messages_received: u64,
}

/// Aggregate registry statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub registry_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub uptime_seconds: i64,
    pub total_charge_points: usize,
    pub authenticated_charge_points: usize,
    pub with_recent_heartbeat: usize,
    pub active_transactions: usize,
    pub average_connection_seconds: i64,
    pub messages_sent: u64,
    pub messages_received: u64,
}

/// Process-wide registry of connected charge points
pub struct GatewayRegistry {
    registry_id: String,
    created_at: DateTime<Utc>,
    last_activity_ms: AtomicI64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    charge_points: DashMap<String, ChargePointConnection>,
    event_bus: SharedEventBus,
    config: RegistryConfig,
}

/// Shared, reference-counted registry
pub type SharedGatewayRegistry = Arc<GatewayRegistry>;

impl GatewayRegistry {
    pub fn new(event_bus: SharedEventBus) -> Self {
        let now = Utc::now();
        let registry_id = uuid::Uuid::new_v4().to_string();
        info!(%registry_id, "Gateway registry created");
        Self {
            registry_id,
            created_at: now,
            last_activity_ms: AtomicI64::new(now.timestamp_millis()),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            charge_points: DashMap::new(),
            event_bus,
            config: RegistryConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    /// Wrap in `Arc` for shared ownership
    pub fn shared(event_bus: SharedEventBus) -> SharedGatewayRegistry {
        Arc::new(Self::new(event_bus))
    }

    pub fn registry_id(&self) -> &str {
        &self.registry_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_activity_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_activity_ms.load(Ordering::SeqCst))
            .unwrap_or(self.created_at)
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::SeqCst)
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::SeqCst)
    }

    pub fn event_bus(&self) -> &SharedEventBus {
        &self.event_bus
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // ── Lifecycle ──────────────────────────────────────────────

    /// Register a charge point after its identification handshake.
    pub fn add_charge_point(
        &self,
        charge_point_id: &str,
        serial_number: &str,
        transport: SharedTransport,
        protocol_version: &str,
    ) -> GatewayResult<()> {
        match self.charge_points.entry(charge_point_id.to_string()) {
            Entry::Occupied(_) => {
                warn!(charge_point_id, "Charge point already registered, ignoring add");
                Err(GatewayError::DuplicateChargePoint(charge_point_id.to_string()))
            }
            Entry::Vacant(vacant) => {
                let now = Utc::now();
                self.mark_activity(now);
                let conn = ChargePointConnection::new(
                    charge_point_id,
                    serial_number,
                    transport,
                    protocol_version,
                    now,
                );
                let _guard = vacant.insert(conn);
                info!(charge_point_id, serial_number, protocol_version, "🔌 Charge point registered");
                self.event_bus.publish(RegistryEvent::Added(ChargePointAddedEvent {
                    charge_point_id: charge_point_id.to_string(),
                    serial_number: serial_number.to_string(),
                    protocol_version: protocol_version.to_string(),
                    timestamp: now,
                }));
                metrics::gauge!("gateway_charge_points").increment(1.0);
                Ok(())
            }
        }
    }

    /// Remove a charge point, closing its transport if still open.
    /// Returns `false` when the id is unknown.
    pub fn remove_charge_point(&self, charge_point_id: &str, reason: RemovalReason) -> bool {
        let Entry::Occupied(occupied) = self.charge_points.entry(charge_point_id.to_string()) else {
            debug!(charge_point_id, "Remove requested for unknown charge point");
            return false;
        };

        let now = Utc::now();
        self.mark_activity(now);

        let transport = occupied.get().transport.clone();
        if transport.is_open() {
            transport.close(close_code::NORMAL, "Charge point removed");
        }

        self.event_bus.publish(RegistryEvent::Removed(ChargePointRemovedEvent {
            charge_point_id: charge_point_id.to_string(),
            reason,
            timestamp: now,
        }));
        occupied.remove();

        info!(charge_point_id, ?reason, "Charge point removed");
        metrics::gauge!("gateway_charge_points").decrement(1.0);
        true
    }

    pub fn authenticate(&self, charge_point_id: &str, authenticated: bool) -> GatewayResult<()> {
        self.update(charge_point_id, |conn, now| {
            conn.is_authenticated = authenticated;
            conn.last_seen_at = now;
            info!(charge_point_id, authenticated, "Authentication state changed");
            self.publish_update(charge_point_id, now, ChargePointChange::Authentication {
                is_authenticated: authenticated,
            });
            Ok(())
        })
    }

    pub fn touch_last_seen(&self, charge_point_id: &str) -> GatewayResult<()> {
        self.update(charge_point_id, |conn, now| {
            conn.last_seen_at = now;
            self.publish_update(charge_point_id, now, ChargePointChange::LastSeen { last_seen_at: now });
            Ok(())
        })
    }

    /// Record a heartbeat. A heartbeat also counts as being seen.
    pub fn touch_heartbeat(&self, charge_point_id: &str) -> GatewayResult<()> {
        self.update(charge_point_id, |conn, now| {
            conn.last_heartbeat_at = now;
            conn.last_seen_at = now;
            self.publish_update(charge_point_id, now, ChargePointChange::Heartbeat {
                last_heartbeat_at: now,
            });
            Ok(())
        })
    }

    /// Count an inbound message. No event is published.
    pub fn record_received(&self, charge_point_id: &str) -> GatewayResult<()> {
        self.update(charge_point_id, |conn, _now| {
            conn.messages_received += 1;
            self.messages_received.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    // ── Outbound ───────────────────────────────────────────────

    /// Hand a payload to the charge point's transport.
    ///
    /// Failures are reported to the caller; the connection stays registered
    /// until liveness or cleanup decide otherwise.
    pub fn send(&self, charge_point_id: &str, message: String) -> GatewayResult<()> {
        let Some(mut conn) = self.charge_points.get_mut(charge_point_id) else {
            warn!(charge_point_id, "Send to unknown charge point");
            return Err(GatewayError::ChargePointNotFound(charge_point_id.to_string()));
        };

        if let Err(e) = conn.transport.send(message) {
            warn!(charge_point_id, error = %e, "Failed to send to charge point");
            metrics::counter!("gateway_send_failures_total", "reason" => e.code()).increment(1);
            return Err(e);
        }

        conn.messages_sent += 1;
        self.messages_sent.fetch_add(1, Ordering::SeqCst);
        self.mark_activity(Utc::now());
        metrics::counter!("gateway_messages_sent_total").increment(1);
        Ok(())
    }

    /// Send to every open charge point except `exclude`. Returns the delivered count.
    pub fn broadcast(&self, message: &str, exclude: Option<&str>) -> usize {
        let mut delivered = 0;
        for mut entry in self.charge_points.iter_mut() {
            if exclude == Some(entry.key().as_str()) || !entry.transport.is_open() {
                continue;
            }
            match entry.transport.send(message.to_string()) {
                Ok(()) => {
                    entry.messages_sent += 1;
                    self.messages_sent.fetch_add(1, Ordering::SeqCst);
                    delivered += 1;
                }
                Err(e) => {
                    warn!(
                        charge_point_id = entry.charge_point_id.as_str(),
                        error = %e,
                        "Failed to broadcast to charge point"
                    );
                }
            }
        }
        if delivered > 0 {
            self.mark_activity(Utc::now());
        }
        delivered
    }

    // ── Connectors ─────────────────────────────────────────────

    /// Last-write-wins status update; unknown connectors are created.
    pub fn update_connector_status(
        &self,
        charge_point_id: &str,
        connector_id: u32,
        status: ConnectorStatus,
        error_code: Option<String>,
    ) -> GatewayResult<()> {
        self.check_connector_id(connector_id)?;
        self.update(charge_point_id, |conn, now| {
            conn.last_seen_at = now;
            let connector = conn.ensure_connector(connector_id);
            connector.status = Some(status);
            connector.error_code = error_code.clone();
            debug!(charge_point_id, connector_id, %status, "Connector status updated");
            self.publish_update(charge_point_id, now, ChargePointChange::ConnectorStatus {
                connector_id,
                status,
                error_code,
            });
            Ok(())
        })
    }

    /// Merge type and max current into a connector without touching its status.
    pub fn update_connector_details(
        &self,
        charge_point_id: &str,
        connector_id: u32,
        connector_type: Option<&str>,
        max_current: Option<f64>,
    ) -> GatewayResult<()> {
        self.check_connector_id(connector_id)?;
        self.update(charge_point_id, |conn, _now| {
            let connector = conn.ensure_connector(connector_id);
            connector.merge_details(connector_type, max_current);
            debug!(
                charge_point_id,
                connector_id,
                connector_type = ?connector.connector_type,
                max_current = ?connector.max_current,
                "Connector details updated"
            );
            Ok(())
        })
    }

    /// Merge a connector inventory and recompute the connector count.
    /// Returns the resulting count.
    pub fn sync_connector_inventory(
        &self,
        charge_point_id: &str,
        connectors: &[ConnectorDescriptor],
        declared_count: Option<u32>,
    ) -> GatewayResult<u32> {
        self.update(charge_point_id, |conn, now| {
            for descriptor in connectors {
                if let Err(e) = self.check_connector_id(descriptor.connector_id) {
                    warn!(charge_point_id, "Skipping inventory entry: {}", e);
                    continue;
                }
                let connector = conn.ensure_connector(descriptor.connector_id);
                connector.merge_details(descriptor.connector_type.as_deref(), descriptor.max_current);
                if let Some(status) = descriptor.status {
                    connector.status = Some(status);
                    let error_code = connector.error_code.clone();
                    self.publish_update(charge_point_id, now, ChargePointChange::ConnectorStatus {
                        connector_id: descriptor.connector_id,
                        status,
                        error_code,
                    });
                }
            }
            let max = self.config.max_connector_id;
            if let Some(declared) = declared_count.filter(|&d| d > max) {
                warn!(charge_point_id, declared, max, "Declared connector count capped");
            }
            conn.recompute_connector_count(declared_count.map(|d| d.min(max)));
            info!(charge_point_id, connector_count = conn.connector_count, "Connector inventory synced");
            Ok(conn.connector_count)
        })
    }

    // ── Metering & transactions ────────────────────────────────

    /// Apply a MeterValues batch. Returns whether the connector's metrics changed.
    pub fn apply_meter_values(
        &self,
        charge_point_id: &str,
        connector_id: u32,
        meter_values: &[MeterValue],
        transaction_id: Option<i32>,
    ) -> GatewayResult<bool> {
        self.check_connector_id(connector_id)?;
        self.update(charge_point_id, |conn, now| {
            // Work on a copy so a batch that changes nothing leaves no trace,
            // not even a synthesized connector.
            let mut metrics = conn
                .connector(connector_id)
                .and_then(|c| c.metrics.clone())
                .unwrap_or_default();
            let before = metrics.active_transaction_id;
            if !engine::apply_meter_samples(&mut metrics, meter_values, transaction_id, now) {
                return Ok(false);
            }
            let after = metrics.active_transaction_id;
            conn.ensure_connector(connector_id).metrics = Some(metrics);

            if before != after {
                if let Some(old) = before {
                    conn.unbind_transaction(old);
                }
                if let Some(new) = after {
                    self.bind_and_publish_displaced(conn, charge_point_id, new, connector_id, now);
                }
            }

            conn.last_seen_at = now;
            self.publish_metrics(conn, charge_point_id, connector_id, transaction_id, now);
            Ok(true)
        })
    }

    pub fn start_transaction(
        &self,
        charge_point_id: &str,
        connector_id: u32,
        start: &TransactionStart,
    ) -> GatewayResult<()> {
        self.check_connector_id(connector_id)?;
        self.update(charge_point_id, |conn, now| {
            let metrics = conn.ensure_connector(connector_id).metrics_mut();
            let previous = metrics.active_transaction_id;
            engine::start_transaction(metrics, start, now);

            if let Some(old) = previous.filter(|&old| old != start.transaction_id) {
                conn.unbind_transaction(old);
            }
            self.bind_and_publish_displaced(conn, charge_point_id, start.transaction_id, connector_id, now);

            conn.last_seen_at = now;
            info!(
                charge_point_id,
                connector_id,
                transaction_id = start.transaction_id,
                "🟢 Transaction started"
            );
            self.publish_metrics(conn, charge_point_id, connector_id, Some(start.transaction_id), now);
            Ok(())
        })
    }

    /// Stop a transaction located through the transaction index.
    /// Returns the connector it ran on, or `None` when no connector holds the id.
    pub fn stop_transaction(&self, charge_point_id: &str, stop: &TransactionStop) -> GatewayResult<Option<u32>> {
        self.update(charge_point_id, |conn, now| {
            let Some(connector_id) = conn.connector_for_transaction(stop.transaction_id) else {
                warn!(
                    charge_point_id,
                    transaction_id = stop.transaction_id,
                    "No connector holds this transaction"
                );
                return Ok(None);
            };

            let applied = conn
                .ensure_connector(connector_id)
                .metrics
                .as_mut()
                .map(|metrics| engine::stop_transaction(metrics, stop, now))
                .unwrap_or(false);
            conn.unbind_transaction(stop.transaction_id);

            if !applied {
                warn!(
                    charge_point_id,
                    transaction_id = stop.transaction_id,
                    "Stale transaction index entry dropped"
                );
                return Ok(None);
            }

            conn.last_seen_at = now;
            info!(charge_point_id, connector_id, transaction_id = stop.transaction_id, "🟥 Transaction stopped");
            self.publish_metrics(conn, charge_point_id, connector_id, Some(stop.transaction_id), now);
            Ok(Some(connector_id))
        })
    }

    /// Administrative reset of a connector's metrics; forces status back to Available.
    pub fn reset_connector_metrics(&self, charge_point_id: &str, connector_id: u32) -> GatewayResult<()> {
        self.check_connector_id(connector_id)?;
        self.update(charge_point_id, |conn, now| {
            conn.unbind_connector(connector_id);
            let connector = conn.ensure_connector(connector_id);
            engine::reset_metrics(connector.metrics_mut(), now);
            connector.status = Some(ConnectorStatus::Available);
            connector.error_code = Some("NoError".to_string());

            conn.last_seen_at = now;
            info!(charge_point_id, connector_id, "Connector metrics reset");
            self.publish_metrics(conn, charge_point_id, connector_id, None, now);
            self.publish_update(charge_point_id, now, ChargePointChange::ConnectorStatus {
                connector_id,
                status: ConnectorStatus::Available,
                error_code: Some("NoError".to_string()),
            });
            Ok(())
        })
    }

    // ── Pending messages ───────────────────────────────────────

    pub fn enqueue_pending(
        &self,
        charge_point_id: &str,
        message_id: &str,
        payload: String,
        max_retries: u32,
    ) -> GatewayResult<()> {
        self.update(charge_point_id, |conn, now| {
            conn.pending_messages.push(PendingMessage {
                message_id: message_id.to_string(),
                payload,
                timestamp: now,
                retry_count: 0,
                max_retries,
            });
            Ok(())
        })
    }

    /// Drop a pending message once its response arrived.
    pub fn acknowledge_pending(&self, charge_point_id: &str, message_id: &str) -> bool {
        self.charge_points
            .get_mut(charge_point_id)
            .map(|mut conn| {
                let before = conn.pending_messages.len();
                conn.pending_messages.retain(|m| m.message_id != message_id);
                conn.pending_messages.len() < before
            })
            .unwrap_or(false)
    }

    /// Re-send pending messages, dropping those that ran out of retries.
    /// Returns how many were re-sent.
    pub fn retry_pending(&self, charge_point_id: &str) -> GatewayResult<usize> {
        self.update(charge_point_id, |conn, _now| {
            let transport = conn.transport.clone();
            let mut resent = 0;
            conn.pending_messages.retain_mut(|pending| {
                if pending.retry_count >= pending.max_retries {
                    warn!(charge_point_id, message_id = %pending.message_id, "Pending message gave up");
                    return false;
                }
                pending.retry_count += 1;
                if transport.send(pending.payload.clone()).is_ok() {
                    resent += 1;
                }
                true
            });
            conn.messages_sent += resent as u64;
            self.messages_sent.fetch_add(resent as u64, Ordering::SeqCst);
            Ok(resent)
        })
    }

    pub fn pending_count(&self, charge_point_id: &str) -> usize {
        self.charge_points
            .get(charge_point_id)
            .map(|conn| conn.pending_messages.len())
            .unwrap_or(0)
    }

    // ── Eviction ───────────────────────────────────────────────

    /// Remove connections not seen for longer than `threshold` or whose
    /// transport is closed. Returns the number removed.
    pub fn cleanup_stale(&self, threshold: Duration) -> usize {
        let now = Utc::now();
        let threshold_ms = i64::try_from(threshold.as_millis()).unwrap_or(i64::MAX);

        let stale: Vec<String> = self
            .charge_points
            .iter()
            .filter(|conn| {
                let age_ms = now.signed_duration_since(conn.last_seen_at).num_milliseconds();
                age_ms > threshold_ms || !conn.transport.is_open()
            })
            .map(|conn| conn.key().clone())
            .collect();

        let removed = stale
            .iter()
            .filter(|id| self.remove_charge_point(id, RemovalReason::Stale))
            .count();

        if removed > 0 {
            info!(removed, "🧹 Stale charge points evicted");
            metrics::counter!("gateway_stale_evictions_total").increment(removed as u64);
        }
        removed
    }

    // ── Reads ──────────────────────────────────────────────────

    pub fn contains(&self, charge_point_id: &str) -> bool {
        self.charge_points.contains_key(charge_point_id)
    }

    pub fn len(&self) -> usize {
        self.charge_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.charge_points.is_empty()
    }

    pub fn charge_point_ids(&self) -> Vec<String> {
        self.charge_points.iter().map(|r| r.key().clone()).collect()
    }

    /// Detail dump for administrative callers.
    pub fn details(&self, charge_point_id: &str) -> Option<ChargePointDetails> {
        self.charge_points.get(charge_point_id).map(|conn| conn.details())
    }

    pub fn all_details(&self) -> Vec<ChargePointDetails> {
        self.charge_points.iter().map(|conn| conn.details()).collect()
    }

    pub fn find_by_serial(&self, serial_number: &str) -> Option<ChargePointDetails> {
        self.charge_points
            .iter()
            .find(|conn| conn.serial_number == serial_number)
            .map(|conn| conn.details())
    }

    pub fn connector(&self, charge_point_id: &str, connector_id: u32) -> Option<ConnectorState> {
        self.charge_points
            .get(charge_point_id)
            .and_then(|conn| conn.connector(connector_id).cloned())
    }

    pub fn connector_for_transaction(&self, charge_point_id: &str, transaction_id: i32) -> Option<u32> {
        self.charge_points
            .get(charge_point_id)
            .and_then(|conn| conn.connector_for_transaction(transaction_id))
    }

    pub fn snapshot(&self, charge_point_id: &str) -> Option<SessionSnapshot> {
        self.charge_points.get(charge_point_id).map(|conn| snapshot_of(&conn))
    }

    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        self.charge_points.iter().map(|conn| snapshot_of(&conn)).collect()
    }

    /// Aggregate statistics; `heartbeat_window` decides what counts as recent.
    pub fn stats(&self, heartbeat_window: Duration) -> RegistryStats {
        let now = Utc::now();
        let window_ms = i64::try_from(heartbeat_window.as_millis()).unwrap_or(i64::MAX);

        let mut total = 0usize;
        let mut authenticated = 0usize;
        let mut recent_heartbeat = 0usize;
        let mut active_transactions = 0usize;
        let mut connection_secs = 0i64;

        for conn in self.charge_points.iter() {
            total += 1;
            if conn.is_authenticated {
                authenticated += 1;
            }
            if now.signed_duration_since(conn.last_heartbeat_at).num_milliseconds() <= window_ms {
                recent_heartbeat += 1;
            }
            active_transactions += conn.active_transaction_count();
            connection_secs += now.signed_duration_since(conn.connected_at).num_seconds();
        }

        RegistryStats {
            registry_id: self.registry_id.clone(),
            created_at: self.created_at,
            last_activity_at: self.last_activity_at(),
            uptime_seconds: now.signed_duration_since(self.created_at).num_seconds(),
            total_charge_points: total,
            authenticated_charge_points: authenticated,
            with_recent_heartbeat: recent_heartbeat,
            active_transactions,
            average_connection_seconds: if total > 0 { connection_secs / total as i64 } else { 0 },
            messages_sent: self.messages_sent(),
            messages_received: self.messages_received(),
        }
    }

    // ── Internals ──────────────────────────────────────────────

    fn update<R>(
        &self,
        charge_point_id: &str,
        f: impl FnOnce(&mut ChargePointConnection, DateTime<Utc>) -> GatewayResult<R>,
    ) -> GatewayResult<R> {
        let Some(mut conn) = self.charge_points.get_mut(charge_point_id) else {
            warn!(charge_point_id, "Charge point not registered");
            return Err(GatewayError::ChargePointNotFound(charge_point_id.to_string()));
        };
        let now = Utc::now();
        self.mark_activity(now);
        f(&mut *conn, now)
    }

    fn mark_activity(&self, now: DateTime<Utc>) {
        self.last_activity_ms.fetch_max(now.timestamp_millis(), Ordering::SeqCst);
    }

    fn publish_update(&self, charge_point_id: &str, now: DateTime<Utc>, change: ChargePointChange) {
        self.event_bus.publish(RegistryEvent::Updated(ChargePointUpdatedEvent {
            charge_point_id: charge_point_id.to_string(),
            timestamp: now,
            change,
        }));
    }

    fn publish_metrics(
        &self,
        conn: &ChargePointConnection,
        charge_point_id: &str,
        connector_id: u32,
        transaction_id: Option<i32>,
        now: DateTime<Utc>,
    ) {
        let metrics = conn
            .connector(connector_id)
            .and_then(|c| c.metrics.clone())
            .unwrap_or_default();
        self.publish_update(charge_point_id, now, ChargePointChange::ConnectorMetrics {
            connector_id,
            metrics,
            transaction_id,
        });
    }

    /// Bind `transaction_id` to `connector_id`; a connector that loses the id
    /// gets its own metrics event.
    fn bind_and_publish_displaced(
        &self,
        conn: &mut ChargePointConnection,
        charge_point_id: &str,
        transaction_id: i32,
        connector_id: u32,
        now: DateTime<Utc>,
    ) {
        if let Some(displaced) = conn.bind_transaction(transaction_id, connector_id) {
            warn!(
                charge_point_id,
                transaction_id,
                from = displaced,
                to = connector_id,
                "Transaction moved between connectors"
            );
            self.publish_metrics(conn, charge_point_id, displaced, None, now);
        }
    }

    /// Connector ids are 1-based and capped by `max_connector_id`.
    fn check_connector_id(&self, connector_id: u32) -> GatewayResult<()> {
        if connector_id == 0 || connector_id > self.config.max_connector_id {
            return Err(GatewayError::InvalidConnectorId(connector_id));
        }
        Ok(())
    }
}

fn snapshot_of(conn: &ChargePointConnection) -> SessionSnapshot {
    SessionSnapshot {
        charge_point_id: conn.charge_point_id.clone(),
        transport_open: conn.transport.is_open(),
        is_authenticated: conn.is_authenticated,
        connected_at: conn.connected_at,
        last_seen_at: conn.last_seen_at,
        last_heartbeat_at: conn.last_heartbeat_at,
        connector_count: conn.connector_count,
        messages_sent: conn.messages_sent,
        messages_received: conn.messages_received,
    }
}

#[cfg(test)]
impl GatewayRegistry {
    /// Direct mutable access for tests that need to age timestamps.
    pub(crate) fn with_connection_mut<R>(
        &self,
        charge_point_id: &str,
        f: impl FnOnce(&mut ChargePointConnection) -> R,
    ) -> Option<R> {
        self.charge_points.get_mut(charge_point_id).map(|mut conn| f(&mut *conn))
    }
}

// ── Tests ──────────────────────────────────────────────────────
