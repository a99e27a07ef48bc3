//! Gateway service
//!
//! Single entry point for the protocol framing layer and the viewer socket
//! handler. Wires the registry, the liveness validator, the fan-out hub and
//! the health monitor together and owns their background tasks.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::application::events::{create_event_bus, RemovalReason};
use crate::application::fanout::{FanOut, FanOutConfig, FanOutStats, SharedFanOut};
use crate::application::services::health_monitor::{HealthConfig, HealthMonitor, HealthReport};
use crate::application::services::liveness::{
    LivenessConfig, LivenessValidator, SharedLivenessValidator, ValidationStats,
};
use crate::application::session::{GatewayRegistry, RegistryConfig, RegistryStats, SharedGatewayRegistry};
use crate::domain::{
    ChargePointDetails, ConnectorDescriptor, ConnectorStatus, GatewayError, GatewayResult,
    MeterValue, SharedTransport, TransactionStart, TransactionStop,
};
use crate::support::shutdown::ShutdownSignal;

/// Settings for every component the service wires up
#[derive(Debug, Clone, Default)]
pub struct GatewaySettings {
    pub registry: RegistryConfig,
    pub liveness: LivenessConfig,
    pub health: HealthConfig,
    pub fanout: FanOutConfig,
}

/// Combined statistics for the administrative surface
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStats {
    pub registry: RegistryStats,
    pub liveness: ValidationStats,
    pub viewers: FanOutStats,
}

pub struct GatewayService {
    registry: SharedGatewayRegistry,
    validator: SharedLivenessValidator,
    fanout: SharedFanOut,
    health: Arc<HealthMonitor>,
    settings: GatewaySettings,
}

pub type SharedGatewayService = Arc<GatewayService>;

impl GatewayService {
    pub fn new(settings: GatewaySettings) -> Self {
        let event_bus = create_event_bus(settings.fanout.event_bus_capacity);
        let registry = Arc::new(GatewayRegistry::new(event_bus).with_config(settings.registry.clone()));
        let validator = Arc::new(LivenessValidator::new(registry.clone()).with_config(settings.liveness.clone()));
        let fanout = Arc::new(FanOut::new(registry.clone(), validator.clone()).with_config(settings.fanout.clone()));
        let health = Arc::new(HealthMonitor::new(registry.clone(), validator.clone()).with_config(settings.health.clone()));

        Self {
            registry,
            validator,
            fanout,
            health,
            settings,
        }
    }

    pub fn shared(settings: GatewaySettings) -> SharedGatewayService {
        Arc::new(Self::new(settings))
    }

    /// Spawn the liveness sweep, the health monitor and the fan-out loop.
    pub fn start(&self, shutdown: ShutdownSignal) {
        self.validator.start(shutdown.clone());
        self.health.start(shutdown.clone());
        self.fanout.start(shutdown);
        info!("🚀 Gateway background services started");
    }

    pub fn registry(&self) -> &SharedGatewayRegistry {
        &self.registry
    }

    pub fn validator(&self) -> &SharedLivenessValidator {
        &self.validator
    }

    pub fn fanout(&self) -> &SharedFanOut {
        &self.fanout
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    // ── Charge point inbound ───────────────────────────────────

    pub fn charge_point_connected(
        &self,
        charge_point_id: &str,
        serial_number: &str,
        transport: SharedTransport,
        protocol_version: &str,
    ) -> GatewayResult<()> {
        self.registry
            .add_charge_point(charge_point_id, serial_number, transport, protocol_version)
    }

    pub fn charge_point_disconnected(&self, charge_point_id: &str) -> bool {
        self.validator.clear_retries(charge_point_id);
        self.registry
            .remove_charge_point(charge_point_id, RemovalReason::Disconnected)
    }

    /// BootNotification accepted
    pub fn boot_authenticated(&self, charge_point_id: &str) -> GatewayResult<()> {
        self.registry.authenticate(charge_point_id, true)
    }

    pub fn heartbeat_received(&self, charge_point_id: &str) -> GatewayResult<()> {
        self.registry.touch_heartbeat(charge_point_id)?;
        self.validator.clear_retries(charge_point_id);
        Ok(())
    }

    /// Any inbound frame: counters, last-seen, and a fresh probe budget.
    pub fn message_received(&self, charge_point_id: &str) -> GatewayResult<()> {
        self.registry.record_received(charge_point_id)?;
        self.registry.touch_last_seen(charge_point_id)?;
        self.validator.clear_retries(charge_point_id);
        Ok(())
    }

    /// StatusNotification. Connector 0 describes the whole charge point and
    /// only counts as activity.
    pub fn status_notification_received(
        &self,
        charge_point_id: &str,
        connector_id: u32,
        status: ConnectorStatus,
        error_code: Option<String>,
    ) -> GatewayResult<()> {
        if connector_id == 0 {
            debug!(charge_point_id, %status, "Charge point level status notification");
            return self.registry.touch_last_seen(charge_point_id);
        }
        self.registry
            .update_connector_status(charge_point_id, connector_id, status, error_code)
    }

    pub fn meter_values_received(
        &self,
        charge_point_id: &str,
        connector_id: u32,
        meter_values: &[MeterValue],
        transaction_id: Option<i32>,
    ) -> GatewayResult<bool> {
        self.registry
            .apply_meter_values(charge_point_id, connector_id, meter_values, transaction_id)
    }

    pub fn transaction_started(
        &self,
        charge_point_id: &str,
        connector_id: u32,
        start: &TransactionStart,
    ) -> GatewayResult<()> {
        self.registry
            .start_transaction(charge_point_id, connector_id, start)
    }

    /// Returns the connector the transaction ran on, `None` when unknown.
    pub fn transaction_stopped(&self, charge_point_id: &str, stop: &TransactionStop) -> GatewayResult<Option<u32>> {
        self.registry.stop_transaction(charge_point_id, stop)
    }

    pub fn connector_inventory_synced(
        &self,
        charge_point_id: &str,
        connectors: &[ConnectorDescriptor],
        declared_count: Option<u32>,
    ) -> GatewayResult<u32> {
        self.registry
            .sync_connector_inventory(charge_point_id, connectors, declared_count)
    }

    /// Type and max current reported for one connector, e.g. from a
    /// configuration read. Status is left as is.
    pub fn connector_details_received(
        &self,
        charge_point_id: &str,
        connector_id: u32,
        connector_type: Option<&str>,
        max_current: Option<f64>,
    ) -> GatewayResult<()> {
        self.registry
            .update_connector_details(charge_point_id, connector_id, connector_type, max_current)
    }

    // ── Outbound ───────────────────────────────────────────────

    pub fn send(&self, charge_point_id: &str, message: String) -> GatewayResult<()> {
        self.registry.send(charge_point_id, message)
    }

    // ── Viewers ────────────────────────────────────────────────

    pub fn viewer_connected(
        &self,
        transport: SharedTransport,
        charge_point_id: &str,
        connector_id: u32,
    ) -> GatewayResult<String> {
        self.fanout.subscribe(transport, charge_point_id, connector_id)
    }

    pub fn viewer_disconnected(&self, subscription_id: &str) -> GatewayResult<()> {
        if self.fanout.unsubscribe(subscription_id) {
            Ok(())
        } else {
            Err(GatewayError::SubscriptionNotFound(subscription_id.to_string()))
        }
    }

    // ── Administrative reads ───────────────────────────────────

    pub fn charge_point_details(&self, charge_point_id: &str) -> Option<ChargePointDetails> {
        self.registry.details(charge_point_id)
    }

    pub fn all_charge_points(&self) -> Vec<ChargePointDetails> {
        self.registry.all_details()
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            registry: self.registry.stats(self.settings.liveness.heartbeat_timeout()),
            liveness: self.validator.stats(),
            viewers: self.fanout.stats(),
        }
    }

    pub fn health_report(&self) -> HealthReport {
        self.health.report()
    }

    /// Evict stale entries now. Uses the health monitor's cleanup threshold
    /// when `threshold` is `None`.
    pub fn force_cleanup(&self, threshold: Option<Duration>) -> usize {
        let threshold = threshold.unwrap_or(Duration::from_secs(self.settings.health.cleanup_after_secs));
        let removed = self.registry.cleanup_stale(threshold);
        info!(removed, threshold_secs = threshold.as_secs(), "Forced cleanup finished");
        removed
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::liveness::ProbeOutcome;
    use crate::domain::MeterSample;
    use crate::infrastructure::transport::{ChannelTransport, TransportFrame};
    use chrono::Utc;
    use tokio::sync::mpsc;

    fn service() -> GatewayService {
        GatewayService::new(GatewaySettings::default())
    }

    fn connect(gw: &GatewayService, id: &str) -> mpsc::Receiver<TransportFrame> {
        let (transport, rx) = ChannelTransport::new(32);
        gw.charge_point_connected(id, "SN-1", Arc::new(transport), "ocpp1.6")
            .unwrap();
        gw.boot_authenticated(id).unwrap();
        gw.connector_inventory_synced(id, &[], Some(2)).unwrap();
        rx
    }

    #[test]
    fn duplicate_connect_is_reported() {
        let gw = service();
        let _rx = connect(&gw, "CP1");
        let (transport, _rx2) = ChannelTransport::new(4);
        let err = gw
            .charge_point_connected("CP1", "SN-2", Arc::new(transport), "ocpp1.6")
            .unwrap_err();
        assert_eq!(err, GatewayError::DuplicateChargePoint("CP1".into()));
        assert_eq!(gw.charge_point_details("CP1").unwrap().serial_number, "SN-1");
    }

    #[tokio::test]
    async fn heartbeat_clears_probe_retries() {
        let gw = service();
        let _rx = connect(&gw, "CP1");
        gw.registry().with_connection_mut("CP1", |conn| {
            conn.last_heartbeat_at = Utc::now() - chrono::Duration::seconds(600);
        });

        assert_eq!(gw.validator().probe_if_offline("CP1"), ProbeOutcome::Sent { attempt: 1 });
        assert_eq!(gw.validator().retry_count("CP1"), 1);

        gw.heartbeat_received("CP1").unwrap();
        assert_eq!(gw.validator().retry_count("CP1"), 0);
        assert!(gw.validator().is_online("CP1"));
    }

    #[test]
    fn connector_zero_status_counts_as_activity() {
        let gw = service();
        let _rx = connect(&gw, "CP1");
        gw.status_notification_received("CP1", 0, ConnectorStatus::Unavailable, None)
            .unwrap();
        let details = gw.charge_point_details("CP1").unwrap();
        assert!(details.connectors.iter().all(|c| c.connector_id != 0));
    }

    #[test]
    fn connector_details_respect_configured_limit() {
        let gw = GatewayService::new(GatewaySettings {
            registry: RegistryConfig { max_connector_id: 8 },
            ..Default::default()
        });
        let _rx = connect(&gw, "CP1");

        gw.connector_details_received("CP1", 2, Some("Type2"), Some(32.0)).unwrap();
        let c2 = gw.registry().connector("CP1", 2).unwrap();
        assert_eq!(c2.connector_type.as_deref(), Some("Type2"));
        assert_eq!(c2.max_current, Some(32.0));

        assert_eq!(
            gw.connector_details_received("CP1", 9, Some("CCS2"), None),
            Err(GatewayError::InvalidConnectorId(9))
        );
        assert_eq!(
            gw.status_notification_received("CP1", 9, ConnectorStatus::Available, None),
            Err(GatewayError::InvalidConnectorId(9))
        );
        assert_eq!(gw.charge_point_details("CP1").unwrap().connector_count, 2);
    }

    #[test]
    fn transaction_round_trip_through_facade() {
        let gw = service();
        let _rx = connect(&gw, "CP1");

        gw.transaction_started("CP1", 1, &TransactionStart::new(55).with_meter_start(1000))
            .unwrap();
        gw.meter_values_received(
            "CP1",
            1,
            &[MeterValue::new(
                Utc::now().to_rfc3339(),
                vec![MeterSample::new("1500").with_unit("Wh")],
            )],
            Some(55),
        )
        .unwrap();
        let connector = gw.registry().connector("CP1", 1).unwrap();
        let delivered = connector.metrics.unwrap().energy_delivered_kwh;
        assert!((delivered - 0.5).abs() < 1e-9);

        let stopped = gw
            .transaction_stopped("CP1", &TransactionStop::new(55).with_meter_stop(2000))
            .unwrap();
        assert_eq!(stopped, Some(1));
        assert_eq!(gw.stats().registry.active_transactions, 0);
    }

    #[test]
    fn send_to_closed_transport_keeps_registration() {
        let gw = service();
        let rx = connect(&gw, "CP1");
        drop(rx);

        let err = gw.send("CP1", "[2,\"1\",\"Reset\",{}]".into()).unwrap_err();
        assert!(err.is_transport());
        assert!(gw.charge_point_details("CP1").is_some());

        assert_eq!(gw.force_cleanup(None), 1);
        assert!(gw.charge_point_details("CP1").is_none());
    }

    #[tokio::test]
    async fn viewer_lifecycle() {
        let gw = service();
        let _rx = connect(&gw, "CP1");
        let (viewer, _viewer_rx) = ChannelTransport::new(8);

        let id = gw.viewer_connected(Arc::new(viewer), "CP1", 2).unwrap();
        assert_eq!(gw.stats().viewers.total_subscriptions, 1);

        gw.viewer_disconnected(&id).unwrap();
        assert_eq!(
            gw.viewer_disconnected(&id),
            Err(GatewayError::SubscriptionNotFound(id.clone()))
        );
    }

    #[test]
    fn disconnect_removes_charge_point() {
        let gw = service();
        let _rx = connect(&gw, "CP1");
        assert!(gw.charge_point_disconnected("CP1"));
        assert!(!gw.charge_point_disconnected("CP1"));
        assert!(gw.message_received("CP1").is_err());
    }
}
