//! Viewer fan-out hub
//!
//! Keeps the viewer subscriptions and turns registry events into viewer
//! frames. Subscription handles are cloned out of the map before any send,
//! so a slow viewer never holds a lock another task needs.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::application::events::{ChargePointChange, EventSubscriber, RegistryEvent};
use crate::application::fanout::messages::ViewerMessage;
use crate::application::fanout::subscription::{SubscriptionInfo, ViewerSubscription};
use crate::application::services::liveness::SharedLivenessValidator;
use crate::application::session::SharedGatewayRegistry;
use crate::domain::{close_code, GatewayError, GatewayResult, SharedTransport};
use crate::support::shutdown::ShutdownSignal;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanOutConfig {
    /// Period of the viewer heartbeat and inactive-subscription purge (seconds)
    pub viewer_heartbeat_interval_secs: u64,
    /// Frames buffered per viewer socket before sends start failing
    pub viewer_buffer: usize,
    /// Registry events buffered for the hub before it starts skipping
    pub event_bus_capacity: usize,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            viewer_heartbeat_interval_secs: 30,
            viewer_buffer: 64,
            event_bus_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FanOutStats {
    pub total_subscriptions: usize,
    pub active_subscriptions: usize,
    pub by_charge_point: BTreeMap<String, usize>,
}

pub struct FanOut {
    registry: SharedGatewayRegistry,
    validator: SharedLivenessValidator,
    subscriptions: DashMap<String, Arc<ViewerSubscription>>,
    config: FanOutConfig,
}

pub type SharedFanOut = Arc<FanOut>;

impl FanOut {
    pub fn new(registry: SharedGatewayRegistry, validator: SharedLivenessValidator) -> Self {
        Self {
            registry,
            validator,
            subscriptions: DashMap::new(),
            config: FanOutConfig::default(),
        }
    }

    pub fn with_config(mut self, config: FanOutConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &FanOutConfig {
        &self.config
    }

    /// Admit a viewer for `(charge_point_id, connector_id)`.
    ///
    /// Rejections send an `error` frame and close the transport with 1008.
    /// An offline charge point is probed before the viewer is turned away.
    pub fn subscribe(
        &self,
        transport: SharedTransport,
        charge_point_id: &str,
        connector_id: u32,
    ) -> GatewayResult<String> {
        if let Some((error, close_reason, details)) = self.admission_check(charge_point_id, connector_id) {
            warn!(
                charge_point_id,
                connector_id,
                code = error.code(),
                "Viewer subscription rejected"
            );
            metrics::counter!("gateway_viewer_rejections_total", "code" => error.code()).increment(1);
            let _ = transport.send(ViewerMessage::from_error(&error, details).to_json());
            transport.close(close_code::POLICY_VIOLATION, close_reason);
            return Err(error);
        }

        let subscription = Arc::new(ViewerSubscription::new(charge_point_id, connector_id, transport));
        let subscription_id = subscription.subscription_id.clone();
        self.subscriptions
            .insert(subscription_id.clone(), subscription.clone());

        info!(%subscription_id, charge_point_id, connector_id, "👀 Viewer subscribed");
        metrics::gauge!("gateway_viewer_subscriptions").set(self.subscriptions.len() as f64);

        self.push_snapshot(&subscription);
        Ok(subscription_id)
    }

    fn admission_check(
        &self,
        charge_point_id: &str,
        connector_id: u32,
    ) -> Option<(GatewayError, &'static str, Option<String>)> {
        if connector_id == 0 {
            return Some((GatewayError::InvalidConnectorId(connector_id), "Invalid connector", None));
        }

        let result = self.validator.validate(charge_point_id, connector_id);
        if !result.is_valid {
            return Some((
                GatewayError::ChargePointNotFound(charge_point_id.to_string()),
                "Session not found",
                None,
            ));
        }
        if !result.is_online {
            let mut reason = result.reason.unwrap_or_default();
            if let Err(e @ GatewayError::ProbeExhausted(_)) =
                self.validator.probe_if_offline(charge_point_id).into_result(charge_point_id)
            {
                reason = format!("{}; {}", reason, e);
            }
            return Some((
                GatewayError::ChargePointOffline {
                    charge_point_id: charge_point_id.to_string(),
                    reason: reason.clone(),
                },
                "Charge point offline",
                Some(reason),
            ));
        }
        if !result.connector_exists {
            return Some((
                GatewayError::ConnectorNotFound {
                    charge_point_id: charge_point_id.to_string(),
                    connector_id,
                },
                "Connector not found",
                Some(format!("{} connector(s) available", result.connector_count)),
            ));
        }
        None
    }

    fn push_snapshot(&self, subscription: &ViewerSubscription) {
        let connector = self
            .registry
            .connector(&subscription.charge_point_id, subscription.connector_id);
        let status = connector
            .as_ref()
            .and_then(|c| c.status)
            .map(|s| s.to_string())
            .unwrap_or_else(|| "Available".to_string());

        let status_message = ViewerMessage::status(
            &subscription.charge_point_id,
            subscription.connector_id,
            status,
            true,
            Some("Subscribed to live updates".to_string()),
        );
        if subscription.deliver(&status_message).is_err() {
            return;
        }

        if let Some(connector) = connector {
            if let Some(metrics) = &connector.metrics {
                let _ = subscription.deliver(&ViewerMessage::charging_data(
                    subscription.connector_id,
                    connector.status,
                    metrics,
                    None,
                ));
            }
        }
    }

    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        let removed = self.subscriptions.remove(subscription_id).is_some();
        if removed {
            info!(subscription_id, "Viewer unsubscribed");
            metrics::gauge!("gateway_viewer_subscriptions").set(self.subscriptions.len() as f64);
        }
        removed
    }

    /// Translate one registry event into viewer frames.
    pub fn on_registry_change(&self, event: &RegistryEvent) {
        let charge_point_id = event.charge_point_id();
        let targets = self.targets(charge_point_id, event.connector_id());
        if targets.is_empty() {
            return;
        }

        match event {
            RegistryEvent::Added(_) => self.deliver_each(&targets, |sub| {
                ViewerMessage::status(
                    charge_point_id,
                    sub.connector_id,
                    "ONLINE",
                    true,
                    Some("Charge point connected".to_string()),
                )
            }),
            RegistryEvent::Removed(removed) => self.deliver_each(&targets, |sub| {
                ViewerMessage::status(
                    charge_point_id,
                    sub.connector_id,
                    "OFFLINE",
                    false,
                    Some(format!("Charge point removed ({})", removed.reason.as_str())),
                )
            }),
            RegistryEvent::Updated(updated) => match &updated.change {
                ChargePointChange::LastSeen { .. } => {
                    let message = ViewerMessage::charge_point_heartbeat(charge_point_id, None, self.active_count());
                    self.deliver_each(&targets, |_| message.clone());
                }
                ChargePointChange::Heartbeat { last_heartbeat_at } => {
                    let message = ViewerMessage::charge_point_heartbeat(
                        charge_point_id,
                        Some(*last_heartbeat_at),
                        self.active_count(),
                    );
                    self.deliver_each(&targets, |_| message.clone());
                }
                ChargePointChange::Authentication { is_authenticated } => {
                    let online = self.validator.is_online(charge_point_id);
                    let status = if *is_authenticated { "AUTHENTICATED" } else { "UNAUTHENTICATED" };
                    self.deliver_each(&targets, |sub| {
                        ViewerMessage::status(charge_point_id, sub.connector_id, status, online, None)
                    });
                }
                ChargePointChange::ConnectorStatus {
                    connector_id,
                    status,
                    error_code,
                } => {
                    let online = self.validator.is_online(charge_point_id);
                    let message = ViewerMessage::status(
                        charge_point_id,
                        *connector_id,
                        status.as_str(),
                        online,
                        error_code.clone().filter(|code| code != "NoError"),
                    );
                    self.deliver_each(&targets, |_| message.clone());
                }
                ChargePointChange::ConnectorMetrics {
                    connector_id,
                    metrics,
                    transaction_id,
                } => {
                    let status = self
                        .registry
                        .connector(charge_point_id, *connector_id)
                        .and_then(|c| c.status);
                    let message = ViewerMessage::charging_data(*connector_id, status, metrics, *transaction_id);
                    self.deliver_each(&targets, |_| message.clone());
                }
            },
        }
    }

    fn targets(&self, charge_point_id: &str, connector_id: Option<u32>) -> Vec<Arc<ViewerSubscription>> {
        self.subscriptions
            .iter()
            .filter(|sub| sub.is_active() && sub.matches(charge_point_id, connector_id))
            .map(|sub| sub.value().clone())
            .collect()
    }

    fn deliver_each(&self, targets: &[Arc<ViewerSubscription>], build: impl Fn(&ViewerSubscription) -> ViewerMessage) {
        let mut delivered = 0u64;
        for subscription in targets {
            if subscription.deliver(&build(subscription)).is_ok() {
                delivered += 1;
            }
        }
        metrics::counter!("gateway_viewer_messages_total").increment(delivered);
    }

    /// Send the periodic `heartbeat` frame to every active viewer.
    pub fn send_heartbeats(&self) -> usize {
        let active: Vec<_> = self
            .subscriptions
            .iter()
            .filter(|sub| sub.is_active())
            .map(|sub| sub.value().clone())
            .collect();
        let message = ViewerMessage::heartbeat(active.len());
        active
            .iter()
            .filter(|sub| sub.deliver(&message).is_ok())
            .count()
    }

    /// Drop subscriptions whose transport closed or whose last send failed.
    pub fn purge_inactive(&self) -> usize {
        let inactive: Vec<String> = self
            .subscriptions
            .iter()
            .filter(|sub| !sub.is_active())
            .map(|sub| sub.key().clone())
            .collect();

        for id in &inactive {
            if let Some((_, subscription)) = self.subscriptions.remove(id) {
                subscription
                    .transport
                    .close(close_code::NORMAL, "Subscription inactive");
            }
        }

        if !inactive.is_empty() {
            info!(purged = inactive.len(), "🧹 Inactive viewer subscriptions purged");
            metrics::gauge!("gateway_viewer_subscriptions").set(self.subscriptions.len() as f64);
        }
        inactive.len()
    }

    /// Close every viewer and forget all subscriptions.
    pub fn close_all(&self, code: u16, reason: &str) {
        let all: Vec<Arc<ViewerSubscription>> = self.subscriptions.iter().map(|s| s.value().clone()).collect();
        self.subscriptions.clear();
        for subscription in &all {
            subscription.transport.close(code, reason);
        }
        info!(closed = all.len(), reason, "Viewer connections closed");
        metrics::gauge!("gateway_viewer_subscriptions").set(0.0);
    }

    /// Subscribe to the registry's change stream and run the hub loop.
    pub fn start(self: &Arc<Self>, shutdown: ShutdownSignal) {
        let events = self.registry.event_bus().subscribe();
        let hub = self.clone();
        tokio::spawn(async move {
            hub.run(events, shutdown).await;
        });
    }

    /// Event loop: relay registry events, heartbeat viewers, and close them
    /// all with 1001 on shutdown.
    pub async fn run(&self, mut events: EventSubscriber, shutdown: ShutdownSignal) {
        let period = Duration::from_secs(self.config.viewer_heartbeat_interval_secs.max(1));
        let mut interval = tokio::time::interval(period);
        interval.tick().await;

        info!("📣 Viewer fan-out started (heartbeat every {}s)", period.as_secs());

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(message) => self.on_registry_change(&message.event),
                    None => {
                        warn!("Event bus closed, fan-out stopping");
                        break;
                    }
                },
                _ = interval.tick() => {
                    let sent = self.send_heartbeats();
                    let purged = self.purge_inactive();
                    debug!(sent, purged, "Viewer maintenance tick");
                }
                _ = shutdown.notified().wait() => {
                    self.close_all(close_code::GOING_AWAY, "Server shutting down");
                    info!("📣 Viewer fan-out shutting down");
                    break;
                }
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.subscriptions.iter().filter(|s| s.is_active()).count()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn subscription(&self, subscription_id: &str) -> Option<SubscriptionInfo> {
        self.subscriptions.get(subscription_id).map(|s| s.info())
    }

    pub fn subscriptions_for(&self, charge_point_id: &str) -> Vec<SubscriptionInfo> {
        self.subscriptions
            .iter()
            .filter(|s| s.charge_point_id == charge_point_id)
            .map(|s| s.info())
            .collect()
    }

    pub fn stats(&self) -> FanOutStats {
        let mut by_charge_point = BTreeMap::new();
        let mut active = 0;
        for sub in self.subscriptions.iter() {
            *by_charge_point.entry(sub.charge_point_id.clone()).or_insert(0) += 1;
            if sub.is_active() {
                active += 1;
            }
        }
        FanOutStats {
            total_subscriptions: self.subscriptions.len(),
            active_subscriptions: active,
            by_charge_point,
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::events::{create_event_bus, EventSubscriber};
    use crate::application::services::liveness::LivenessValidator;
    use crate::application::session::GatewayRegistry;
    use crate::domain::metering::{MeterSample, MeterValue};
    use crate::domain::ConnectorStatus;
    use crate::infrastructure::transport::{ChannelTransport, TransportFrame};
    use chrono::Utc;
    use tokio::sync::mpsc;

    struct Fixture {
        registry: SharedGatewayRegistry,
        hub: Arc<FanOut>,
        events: EventSubscriber,
    }

    fn fixture() -> Fixture {
        let registry = GatewayRegistry::shared(create_event_bus(256));
        let events = registry.event_bus().subscribe();
        let validator = Arc::new(LivenessValidator::new(registry.clone()));
        let hub = Arc::new(FanOut::new(registry.clone(), validator));
        Fixture { registry, hub, events }
    }

    impl Fixture {
        fn online(&self, id: &str, connectors: u32) -> mpsc::Receiver<TransportFrame> {
            let (transport, rx) = ChannelTransport::new(64);
            self.registry
                .add_charge_point(id, "SN", Arc::new(transport), "ocpp1.6")
                .unwrap();
            self.registry.authenticate(id, true).unwrap();
            self.registry
                .sync_connector_inventory(id, &[], Some(connectors))
                .unwrap();
            rx
        }

        fn viewer(&self, buffer: usize) -> (SharedTransport, mpsc::Receiver<TransportFrame>) {
            let (transport, rx) = ChannelTransport::new(buffer);
            (Arc::new(transport), rx)
        }

        /// Feed every pending bus event to the hub.
        fn pump(&mut self) {
            while let Some(message) = self.events.try_recv() {
                self.hub.on_registry_change(&message.event);
            }
        }
    }

    fn frames(rx: &mut mpsc::Receiver<TransportFrame>) -> Vec<TransportFrame> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    fn json_frames(rx: &mut mpsc::Receiver<TransportFrame>) -> Vec<serde_json::Value> {
        frames(rx)
            .into_iter()
            .filter_map(|f| match f {
                TransportFrame::Text(text) => serde_json::from_str(&text).ok(),
                TransportFrame::Close { .. } => None,
            })
            .collect()
    }

    fn close_of(rx: &mut mpsc::Receiver<TransportFrame>) -> Option<(u16, String)> {
        frames(rx).into_iter().find_map(|f| match f {
            TransportFrame::Close { code, reason } => Some((code, reason)),
            TransportFrame::Text(_) => None,
        })
    }

    #[tokio::test]
    async fn unknown_charge_point_is_rejected() {
        let fx = fixture();
        let (transport, mut rx) = fx.viewer(8);

        let err = fx.hub.subscribe(transport, "GHOST", 1).unwrap_err();
        assert_eq!(err.code(), "SESSION_NOT_FOUND");

        let all = frames(&mut rx);
        match &all[0] {
            TransportFrame::Text(text) => assert!(text.contains("SESSION_NOT_FOUND")),
            other => panic!("expected error frame, got {:?}", other),
        }
        assert_eq!(
            all[1],
            TransportFrame::Close {
                code: close_code::POLICY_VIOLATION,
                reason: "Session not found".into()
            }
        );
        assert!(fx.hub.is_empty());
    }

    #[tokio::test]
    async fn offline_charge_point_is_probed_and_rejected() {
        let fx = fixture();
        let mut cp_rx = fx.online("CP1", 1);
        fx.registry.with_connection_mut("CP1", |conn| {
            conn.last_heartbeat_at = Utc::now() - chrono::Duration::seconds(600);
        });
        let (transport, mut rx) = fx.viewer(8);

        let err = fx.hub.subscribe(transport, "CP1", 1).unwrap_err();
        assert_eq!(err.code(), "CHARGE_POINT_OFFLINE");

        let errors = json_frames(&mut rx);
        assert!(errors[0]["data"]["details"]
            .as_str()
            .unwrap()
            .contains("heartbeat timed out"));
        assert!(fx.hub.is_empty());

        let probe = frames(&mut cp_rx);
        assert!(probe
            .iter()
            .any(|f| matches!(f, TransportFrame::Text(t) if t.contains("\"Heartbeat\""))));
    }

    #[tokio::test]
    async fn rejection_reports_exhausted_retries() {
        let fx = fixture();
        let _cp_rx = fx.online("CP1", 1);
        fx.registry.with_connection_mut("CP1", |conn| {
            conn.last_heartbeat_at = Utc::now() - chrono::Duration::seconds(600);
        });

        for _ in 0..3 {
            let (transport, _rx) = fx.viewer(8);
            assert!(fx.hub.subscribe(transport, "CP1", 1).is_err());
        }
        let (transport, mut rx) = fx.viewer(8);
        assert!(fx.hub.subscribe(transport, "CP1", 1).is_err());

        let errors = json_frames(&mut rx);
        assert!(errors[0]["data"]["details"]
            .as_str()
            .unwrap()
            .contains("Offline probing exhausted for CP1"));
    }

    #[tokio::test]
    async fn offline_rejection_closes_with_policy_code() {
        let fx = fixture();
        let _cp_rx = fx.online("CP1", 1);
        fx.registry.authenticate("CP1", false).unwrap();
        let (transport, mut rx) = fx.viewer(8);

        assert!(fx.hub.subscribe(transport, "CP1", 1).is_err());
        assert_eq!(
            close_of(&mut rx),
            Some((close_code::POLICY_VIOLATION, "Charge point offline".to_string()))
        );
    }

    #[tokio::test]
    async fn connector_out_of_range_and_zero() {
        let fx = fixture();
        let _cp = fx.online("CP1", 2);

        let (transport, mut rx) = fx.viewer(8);
        let err = fx.hub.subscribe(transport, "CP1", 3).unwrap_err();
        assert_eq!(err.code(), "CONNECTOR_NOT_FOUND");
        assert_eq!(close_of(&mut rx).unwrap().1, "Connector not found");

        let (transport, _rx) = fx.viewer(8);
        let err = fx.hub.subscribe(transport, "CP1", 0).unwrap_err();
        assert_eq!(err.code(), "INVALID_CONNECTOR");
    }

    #[tokio::test]
    async fn subscribe_pushes_snapshot() {
        let fx = fixture();
        let _cp = fx.online("CP1", 2);
        fx.registry
            .update_connector_status("CP1", 2, ConnectorStatus::Charging, None)
            .unwrap();
        fx.registry
            .apply_meter_values(
                "CP1",
                2,
                &[MeterValue::new(
                    Utc::now().to_rfc3339(),
                    vec![MeterSample::new("55").with_measurand("SoC")],
                )],
                None,
            )
            .unwrap();

        let (transport, mut rx) = fx.viewer(8);
        let id = fx.hub.subscribe(transport, "CP1", 2).unwrap();
        assert!(fx.hub.subscription(&id).unwrap().is_active);

        let sent = json_frames(&mut rx);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0]["type"], "status");
        assert_eq!(sent[0]["data"]["status"], "Charging");
        assert_eq!(sent[1]["type"], "charging_data");
        assert_eq!(sent[1]["data"]["chargingPercentage"], 55.0);
    }

    #[tokio::test]
    async fn connector_events_reach_only_matching_viewers() {
        let mut fx = fixture();
        let _cp = fx.online("CP1", 2);
        let (t1, mut rx1) = fx.viewer(16);
        let (t2, mut rx2) = fx.viewer(16);
        fx.hub.subscribe(t1, "CP1", 1).unwrap();
        fx.hub.subscribe(t2, "CP1", 2).unwrap();
        fx.pump();
        frames(&mut rx1);
        frames(&mut rx2);

        fx.registry
            .update_connector_status("CP1", 2, ConnectorStatus::Preparing, None)
            .unwrap();
        fx.pump();
        assert!(json_frames(&mut rx1).is_empty());
        let got = json_frames(&mut rx2);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0]["data"]["status"], "Preparing");

        fx.registry.touch_heartbeat("CP1").unwrap();
        fx.pump();
        assert_eq!(json_frames(&mut rx1)[0]["type"], "heartbeat");
        assert_eq!(json_frames(&mut rx2)[0]["type"], "heartbeat");
    }

    #[tokio::test]
    async fn removal_tells_viewers_offline() {
        let mut fx = fixture();
        let _cp = fx.online("CP1", 1);
        let (t, mut rx) = fx.viewer(16);
        fx.hub.subscribe(t, "CP1", 1).unwrap();
        fx.pump();
        frames(&mut rx);

        fx.registry
            .remove_charge_point("CP1", crate::application::events::RemovalReason::Disconnected);
        fx.pump();
        let got = json_frames(&mut rx);
        assert_eq!(got[0]["data"]["status"], "OFFLINE");
        assert_eq!(got[0]["data"]["isOnline"], false);
    }

    #[tokio::test]
    async fn failing_viewer_does_not_block_others() {
        let mut fx = fixture();
        let _cp = fx.online("CP1", 1);

        // Buffer of one: the snapshot fills it, the next frame fails.
        let (slow, _slow_rx) = fx.viewer(1);
        let (fast, mut fast_rx) = fx.viewer(16);
        let slow_id = fx.hub.subscribe(slow, "CP1", 1).unwrap();
        fx.hub.subscribe(fast, "CP1", 1).unwrap();
        fx.pump();
        frames(&mut fast_rx);

        fx.registry
            .update_connector_status("CP1", 1, ConnectorStatus::Charging, None)
            .unwrap();
        fx.pump();

        assert_eq!(json_frames(&mut fast_rx).len(), 1);
        assert!(!fx.hub.subscription(&slow_id).unwrap().is_active);
        assert_eq!(fx.hub.stats().active_subscriptions, 1);

        assert_eq!(fx.hub.purge_inactive(), 1);
        assert_eq!(fx.hub.len(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_removes_entry() {
        let fx = fixture();
        let _cp = fx.online("CP1", 1);
        let (t, _rx) = fx.viewer(8);
        let id = fx.hub.subscribe(t, "CP1", 1).unwrap();

        assert!(fx.hub.unsubscribe(&id));
        assert!(!fx.hub.unsubscribe(&id));
        assert!(fx.hub.subscriptions_for("CP1").is_empty());
    }

    #[tokio::test]
    async fn shutdown_closes_viewers_with_going_away() {
        let fx = fixture();
        let _cp = fx.online("CP1", 1);
        let (t, mut rx) = fx.viewer(8);
        fx.hub.subscribe(t, "CP1", 1).unwrap();
        frames(&mut rx);

        let shutdown = ShutdownSignal::new();
        fx.hub.start(shutdown.clone());
        tokio::task::yield_now().await;
        shutdown.trigger();

        let frame = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                match rx.recv().await {
                    Some(TransportFrame::Close { code, reason }) => return (code, reason),
                    Some(_) => continue,
                    None => panic!("viewer channel dropped"),
                }
            }
        })
        .await
        .expect("no close frame");
        assert_eq!(frame, (close_code::GOING_AWAY, "Server shutting down".to_string()));
    }

    #[tokio::test]
    async fn heartbeat_tick_reports_active_count() {
        let fx = fixture();
        let _cp = fx.online("CP1", 1);
        let (t, mut rx) = fx.viewer(8);
        fx.hub.subscribe(t, "CP1", 1).unwrap();
        frames(&mut rx);

        assert_eq!(fx.hub.send_heartbeats(), 1);
        let got = json_frames(&mut rx);
        assert_eq!(got[0]["type"], "heartbeat");
        assert_eq!(got[0]["data"]["activeSubscriptionCount"], 1);
    }
}
