//! Liveness validator
//!
//! Online status is derived on every check from registry timestamps; no
//! per-connection timer exists. Offline charge points get a bounded number
//! of Heartbeat probes before the validator gives up on them until fresh
//! inbound traffic resets the counter.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock as AsyncRwLock;
use tracing::{debug, info, warn};

use crate::application::session::{SessionSnapshot, SharedGatewayRegistry};
use crate::domain::{GatewayError, GatewayResult};
use crate::support::shutdown::ShutdownSignal;

/// Liveness thresholds and probing limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// Max heartbeat age before a charge point counts as offline (seconds)
    pub heartbeat_timeout_secs: u64,
    /// Max age of any inbound activity before a charge point counts as offline (seconds)
    pub connection_timeout_secs: u64,
    /// Probes sent to an offline charge point before giving up
    pub max_offline_retries: u32,
    /// Sweep period (seconds)
    pub offline_check_interval_secs: u64,
    /// Wait after a probe before checking for a fresh heartbeat (seconds)
    pub probe_check_delay_secs: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: 120,
            connection_timeout_secs: 300,
            max_offline_retries: 3,
            offline_check_interval_secs: 30,
            probe_check_delay_secs: 5,
        }
    }
}

impl LivenessConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }
}

/// Outcome of `validate`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub charge_point_id: String,
    pub connector_id: u32,
    /// The charge point is known to the registry
    pub is_valid: bool,
    pub is_online: bool,
    pub connector_exists: bool,
    pub connector_count: u32,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// Every failing sub-condition, joined
    pub reason: Option<String>,
}

/// Result of `probe_if_offline`
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// Probe sent; `attempt` is the 1-based retry number
    Sent { attempt: u32 },
    /// Retry cap reached, nothing sent
    Exhausted,
    /// Charge point not registered
    Unknown,
    SendFailed(GatewayError),
}

impl ProbeOutcome {
    /// Attempt number on success; exhaustion and unknown ids become errors.
    pub fn into_result(self, charge_point_id: &str) -> GatewayResult<u32> {
        match self {
            Self::Sent { attempt } => Ok(attempt),
            Self::Exhausted => Err(GatewayError::ProbeExhausted(charge_point_id.to_string())),
            Self::Unknown => Err(GatewayError::ChargePointNotFound(charge_point_id.to_string())),
            Self::SendFailed(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone)]
struct ProbeState {
    retries: u32,
    last_probe_at: DateTime<Utc>,
}

/// Per charge point liveness line in [`ValidationStats`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargePointLiveness {
    pub charge_point_id: String,
    pub is_online: bool,
    pub is_authenticated: bool,
    pub connector_count: u32,
    pub last_heartbeat_at: DateTime<Utc>,
    pub seconds_since_heartbeat: i64,
    pub retry_count: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationStats {
    pub total_charge_points: usize,
    pub online_charge_points: usize,
    pub offline_charge_points: usize,
    pub authenticated_charge_points: usize,
    pub with_valid_heartbeat: usize,
    pub probing: usize,
    pub exhausted: usize,
    pub charge_points: Vec<ChargePointLiveness>,
}

/// Computes online status and drives bounded offline probing
#[derive(Clone)]
pub struct LivenessValidator {
    registry: SharedGatewayRegistry,
    config: Arc<RwLock<LivenessConfig>>,
    probes: Arc<DashMap<String, ProbeState>>,
    running: Arc<AsyncRwLock<bool>>,
}

/// Shared validator handle
pub type SharedLivenessValidator = Arc<LivenessValidator>;

impl LivenessValidator {
    pub fn new(registry: SharedGatewayRegistry) -> Self {
        Self {
            registry,
            config: Arc::new(RwLock::new(LivenessConfig::default())),
            probes: Arc::new(DashMap::new()),
            running: Arc::new(AsyncRwLock::new(false)),
        }
    }

    pub fn with_config(self, config: LivenessConfig) -> Self {
        self.update_settings(config);
        self
    }

    pub fn config(&self) -> LivenessConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replace thresholds at runtime; takes effect on the next check.
    pub fn update_settings(&self, config: LivenessConfig) {
        info!(?config, "⚙️ Liveness settings updated");
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
    }

    pub fn validate(&self, charge_point_id: &str, connector_id: u32) -> ValidationResult {
        self.validate_at(charge_point_id, connector_id, Utc::now())
    }

    /// `validate` against an explicit clock.
    pub fn validate_at(&self, charge_point_id: &str, connector_id: u32, now: DateTime<Utc>) -> ValidationResult {
        match self.registry.snapshot(charge_point_id) {
            Some(snapshot) => evaluate(&snapshot, connector_id, now, &self.config()),
            None => ValidationResult {
                charge_point_id: charge_point_id.to_string(),
                connector_id,
                is_valid: false,
                is_online: false,
                connector_exists: false,
                connector_count: 0,
                connected_at: None,
                last_seen_at: None,
                last_heartbeat_at: None,
                reason: Some(format!("charge point {} is not connected", charge_point_id)),
            },
        }
    }

    pub fn is_online(&self, charge_point_id: &str) -> bool {
        self.validate(charge_point_id, 1).is_online
    }

    pub fn retry_count(&self, charge_point_id: &str) -> u32 {
        self.probes.get(charge_point_id).map(|p| p.retries).unwrap_or(0)
    }

    /// Forget probing state; called whenever a fresh heartbeat arrives.
    pub fn clear_retries(&self, charge_point_id: &str) {
        if self.probes.remove(charge_point_id).is_some() {
            debug!(charge_point_id, "Probe retries cleared");
        }
    }

    /// Send a Heartbeat probe unless the retry cap is reached.
    ///
    /// A successful probe schedules a delayed check: if a heartbeat newer than
    /// the probe has arrived by then, the retry counter is cleared.
    pub fn probe_if_offline(&self, charge_point_id: &str) -> ProbeOutcome {
        if !self.registry.contains(charge_point_id) {
            return ProbeOutcome::Unknown;
        }

        let config = self.config();
        let sent_at = Utc::now();

        // Reserve the attempt under the entry guard so concurrent callers
        // cannot both pass the cap.
        let attempt = {
            let mut state = self.probes.entry(charge_point_id.to_string()).or_insert(ProbeState {
                retries: 0,
                last_probe_at: sent_at,
            });
            if state.retries >= config.max_offline_retries {
                let retries = state.retries;
                drop(state);
                self.probes.remove_if(charge_point_id, |_, s| s.retries == 0);
                debug!(
                    charge_point_id,
                    retries,
                    max = config.max_offline_retries,
                    "⚠️ Probe limit reached, leaving charge point offline"
                );
                metrics::counter!("gateway_probes_skipped_total").increment(1);
                return ProbeOutcome::Exhausted;
            }
            state.retries += 1;
            state.last_probe_at = sent_at;
            state.retries
        };

        let probe = serde_json::json!([
            2,
            format!("heartbeat-check-{}", sent_at.timestamp_millis()),
            "Heartbeat",
            {}
        ]);

        if let Err(e) = self.registry.send(charge_point_id, probe.to_string()) {
            warn!(charge_point_id, error = %e, "❌ Could not send liveness probe");
            if let Some(mut state) = self.probes.get_mut(charge_point_id) {
                state.retries = state.retries.saturating_sub(1);
            }
            self.probes.remove_if(charge_point_id, |_, s| s.retries == 0);
            return ProbeOutcome::SendFailed(e);
        }

        info!(charge_point_id, attempt, "💓 Liveness probe sent");
        metrics::counter!("gateway_probes_sent_total").increment(1);

        let registry = self.registry.clone();
        let probes = self.probes.clone();
        let id = charge_point_id.to_string();
        let delay = Duration::from_secs(config.probe_check_delay_secs);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(snapshot) = registry.snapshot(&id) else {
                probes.remove(&id);
                return;
            };
            if snapshot.last_heartbeat_at >= sent_at {
                probes.remove(&id);
                info!(charge_point_id = %id, "✅ Charge point answered probe");
            }
        });

        ProbeOutcome::Sent { attempt }
    }

    /// Evaluate every charge point once: probe the offline, reset the online.
    pub fn sweep(&self) {
        let snapshots = self.registry.snapshots();
        let config = self.config();
        let now = Utc::now();

        self.probes
            .retain(|id, _| snapshots.iter().any(|s| &s.charge_point_id == id));

        let mut offline = 0usize;
        for snapshot in &snapshots {
            let result = evaluate(snapshot, 1, now, &config);
            if result.is_online {
                self.clear_retries(&snapshot.charge_point_id);
            } else {
                offline += 1;
                debug!(charge_point_id = %snapshot.charge_point_id, reason = ?result.reason, "Charge point offline");
                self.probe_if_offline(&snapshot.charge_point_id);
            }
        }

        metrics::gauge!("gateway_charge_points_offline").set(offline as f64);
        debug!(total = snapshots.len(), offline, "Liveness sweep complete");
    }

    /// Start the periodic sweep
    pub fn start(&self, shutdown: ShutdownSignal) {
        let validator = self.clone();
        let period = Duration::from_secs(self.config().offline_check_interval_secs.max(1));

        tokio::spawn(async move {
            *validator.running.write().await = true;
            info!("🔍 Liveness sweep started (every {}s)", period.as_secs());

            let mut interval = tokio::time::interval(period);
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => validator.sweep(),
                    _ = shutdown.notified().wait() => {
                        info!("🔍 Liveness sweep shutting down");
                        break;
                    }
                }
            }

            *validator.running.write().await = false;
        });
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    pub fn stats(&self) -> ValidationStats {
        let config = self.config();
        let now = Utc::now();
        let heartbeat_timeout_ms = to_millis(config.heartbeat_timeout());

        let charge_points: Vec<ChargePointLiveness> = self
            .registry
            .snapshots()
            .into_iter()
            .map(|s| {
                let result = evaluate(&s, 1, now, &config);
                ChargePointLiveness {
                    is_online: result.is_online,
                    is_authenticated: s.is_authenticated,
                    connector_count: s.connector_count,
                    last_heartbeat_at: s.last_heartbeat_at,
                    seconds_since_heartbeat: now.signed_duration_since(s.last_heartbeat_at).num_seconds(),
                    retry_count: self.retry_count(&s.charge_point_id),
                    charge_point_id: s.charge_point_id,
                }
            })
            .collect();

        let online = charge_points.iter().filter(|c| c.is_online).count();
        ValidationStats {
            total_charge_points: charge_points.len(),
            online_charge_points: online,
            offline_charge_points: charge_points.len() - online,
            authenticated_charge_points: charge_points.iter().filter(|c| c.is_authenticated).count(),
            with_valid_heartbeat: charge_points
                .iter()
                .filter(|c| c.seconds_since_heartbeat * 1000 <= heartbeat_timeout_ms)
                .count(),
            probing: self.probes.len(),
            exhausted: self
                .probes
                .iter()
                .filter(|p| p.retries >= config.max_offline_retries)
                .count(),
            charge_points,
        }
    }

    /// Time of the last probe sent to `charge_point_id`, if any.
    pub fn last_probe_at(&self, charge_point_id: &str) -> Option<DateTime<Utc>> {
        self.probes.get(charge_point_id).map(|p| p.last_probe_at)
    }
}

fn to_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

fn evaluate(snapshot: &SessionSnapshot, connector_id: u32, now: DateTime<Utc>, config: &LivenessConfig) -> ValidationResult {
    let heartbeat_age = now.signed_duration_since(snapshot.last_heartbeat_at);
    let seen_age = now.signed_duration_since(snapshot.last_seen_at);

    let mut reasons = Vec::new();
    if !snapshot.transport_open {
        reasons.push("transport closed".to_string());
    }
    if !snapshot.is_authenticated {
        reasons.push("not authenticated".to_string());
    }
    if heartbeat_age.num_milliseconds() > to_millis(config.heartbeat_timeout()) {
        reasons.push(format!(
            "heartbeat timed out ({}s ago, limit {}s)",
            heartbeat_age.num_seconds(),
            config.heartbeat_timeout_secs
        ));
    }
    if seen_age.num_milliseconds() > to_millis(config.connection_timeout()) {
        reasons.push(format!(
            "connection timed out ({}s since last activity, limit {}s)",
            seen_age.num_seconds(),
            config.connection_timeout_secs
        ));
    }
    let is_online = reasons.is_empty();

    let connector_exists = connector_id >= 1 && connector_id <= snapshot.connector_count;
    if !connector_exists {
        reasons.push(format!(
            "connector {} not found ({} available)",
            connector_id, snapshot.connector_count
        ));
    }

    ValidationResult {
        charge_point_id: snapshot.charge_point_id.clone(),
        connector_id,
        is_valid: true,
        is_online,
        connector_exists,
        connector_count: snapshot.connector_count,
        connected_at: Some(snapshot.connected_at),
        last_seen_at: Some(snapshot.last_seen_at),
        last_heartbeat_at: Some(snapshot.last_heartbeat_at),
        reason: (!reasons.is_empty()).then(|| reasons.join("; ")),
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::events::create_event_bus;
    use crate::application::session::GatewayRegistry;
    use crate::domain::ConnectorStatus;
    use crate::infrastructure::transport::{ChannelTransport, TransportFrame};
    use tokio::sync::mpsc;

    fn setup() -> (SharedGatewayRegistry, LivenessValidator) {
        let registry = GatewayRegistry::shared(create_event_bus(64));
        let validator = LivenessValidator::new(registry.clone());
        (registry, validator)
    }

    fn connect(registry: &GatewayRegistry, id: &str, authenticate: bool) -> mpsc::Receiver<TransportFrame> {
        let (transport, rx) = ChannelTransport::new(32);
        registry.add_charge_point(id, "SN", Arc::new(transport), "ocpp1.6").unwrap();
        if authenticate {
            registry.authenticate(id, true).unwrap();
        }
        registry
            .update_connector_status(id, 1, ConnectorStatus::Available, None)
            .unwrap();
        rx
    }

    fn age_heartbeat(registry: &GatewayRegistry, id: &str, secs: i64) {
        registry.with_connection_mut(id, |conn| {
            conn.last_heartbeat_at = Utc::now() - chrono::Duration::seconds(secs);
        });
    }

    #[test]
    fn fresh_authenticated_charge_point_is_online() {
        let (registry, validator) = setup();
        let _rx = connect(&registry, "CP1", true);

        let result = validator.validate("CP1", 1);
        assert!(result.is_valid);
        assert!(result.is_online);
        assert!(result.connector_exists);
        assert_eq!(result.reason, None);
    }

    #[test]
    fn unknown_charge_point_is_invalid() {
        let (_registry, validator) = setup();
        let result = validator.validate("GHOST", 1);
        assert!(!result.is_valid);
        assert!(!result.is_online);
        assert_eq!(result.connector_count, 0);
        assert!(result.reason.is_some());
    }

    #[test]
    fn stale_heartbeat_means_offline_regardless_of_rest() {
        let (registry, validator) = setup();
        let _rx = connect(&registry, "CP1", true);
        let now = Utc::now();

        let later = now + chrono::Duration::seconds(121);
        registry.with_connection_mut("CP1", |conn| {
            conn.last_seen_at = later;
            conn.last_heartbeat_at = now;
        });

        let result = validator.validate_at("CP1", 1, later);
        assert!(!result.is_online);
        assert!(result.reason.unwrap().contains("heartbeat timed out"));
    }

    #[test]
    fn reason_joins_every_failure() {
        let (registry, validator) = setup();
        let rx = connect(&registry, "CP1", false);
        drop(rx);
        age_heartbeat(&registry, "CP1", 600);

        let reason = validator.validate("CP1", 4).reason.unwrap();
        assert!(reason.contains("transport closed"));
        assert!(reason.contains("not authenticated"));
        assert!(reason.contains("heartbeat timed out"));
        assert!(reason.contains("connector 4 not found"));
    }

    #[test]
    fn connector_zero_and_out_of_range_do_not_exist() {
        let (registry, validator) = setup();
        let _rx = connect(&registry, "CP1", true);
        assert!(!validator.validate("CP1", 0).connector_exists);
        assert!(!validator.validate("CP1", 2).connector_exists);
        assert!(validator.validate("CP1", 2).is_online);
    }

    #[tokio::test]
    async fn probing_stops_at_retry_cap() {
        let (registry, validator) = setup();
        let mut rx = connect(&registry, "CP1", true);
        age_heartbeat(&registry, "CP1", 600);

        for attempt in 1..=3 {
            assert_eq!(validator.probe_if_offline("CP1"), ProbeOutcome::Sent { attempt });
        }
        assert_eq!(validator.probe_if_offline("CP1"), ProbeOutcome::Exhausted);
        assert!(!validator.validate("CP1", 1).is_online);

        let probes = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|f| matches!(f, TransportFrame::Text(t) if t.contains("\"Heartbeat\"")))
            .count();
        assert_eq!(probes, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_after_probe_clears_counter() {
        let (registry, validator) = setup();
        let _rx = connect(&registry, "CP1", true);
        age_heartbeat(&registry, "CP1", 600);

        assert_eq!(validator.probe_if_offline("CP1"), ProbeOutcome::Sent { attempt: 1 });
        registry.touch_heartbeat("CP1").unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(validator.retry_count("CP1"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_charge_point_keeps_counter() {
        let (registry, validator) = setup();
        let _rx = connect(&registry, "CP1", true);
        age_heartbeat(&registry, "CP1", 600);

        validator.probe_if_offline("CP1");
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(validator.retry_count("CP1"), 1);
    }

    #[tokio::test]
    async fn sweep_probes_offline_and_resets_online() {
        let (registry, validator) = setup();
        let _a = connect(&registry, "ONLINE", true);
        let _b = connect(&registry, "OFFLINE", true);
        age_heartbeat(&registry, "OFFLINE", 600);

        validator.probes.insert(
            "ONLINE".into(),
            ProbeState {
                retries: 2,
                last_probe_at: Utc::now(),
            },
        );

        validator.sweep();
        assert_eq!(validator.retry_count("ONLINE"), 0);
        assert_eq!(validator.retry_count("OFFLINE"), 1);

        let stats = validator.stats();
        assert_eq!(stats.total_charge_points, 2);
        assert_eq!(stats.online_charge_points, 1);
        assert_eq!(stats.probing, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_respect_retry_cap() {
        for _ in 0..50 {
            let (registry, validator) = setup();
            let validator = Arc::new(validator);
            let mut rx = connect(&registry, "CP1", true);
            age_heartbeat(&registry, "CP1", 600);

            let barrier = Arc::new(std::sync::Barrier::new(8));
            let callers: Vec<_> = (0..8)
                .map(|_| {
                    let validator = validator.clone();
                    let barrier = barrier.clone();
                    tokio::task::spawn_blocking(move || {
                        barrier.wait();
                        validator.probe_if_offline("CP1")
                    })
                })
                .collect();

            let mut sent = 0;
            for caller in callers {
                if matches!(caller.await.unwrap(), ProbeOutcome::Sent { .. }) {
                    sent += 1;
                }
            }
            assert_eq!(sent, 3);
            assert_eq!(validator.retry_count("CP1"), 3);

            let frames = std::iter::from_fn(|| rx.try_recv().ok())
                .filter(|f| matches!(f, TransportFrame::Text(t) if t.contains("\"Heartbeat\"")))
                .count();
            assert_eq!(frames, 3);
        }
    }

    #[test]
    fn failed_send_does_not_consume_a_retry() {
        let (registry, validator) = setup();
        let rx = connect(&registry, "CP1", true);
        drop(rx);

        let outcome = validator.probe_if_offline("CP1");
        assert!(matches!(outcome, ProbeOutcome::SendFailed(GatewayError::TransportClosed)));
        assert_eq!(validator.retry_count("CP1"), 0);
        assert_eq!(validator.stats().probing, 0);
    }

    #[tokio::test]
    async fn exhausted_outcome_maps_to_error() {
        let (registry, validator) = setup();
        let _rx = connect(&registry, "CP1", true);
        age_heartbeat(&registry, "CP1", 600);

        for _ in 0..3 {
            assert!(validator.probe_if_offline("CP1").into_result("CP1").is_ok());
        }
        let err = validator.probe_if_offline("CP1").into_result("CP1").unwrap_err();
        assert_eq!(err, GatewayError::ProbeExhausted("CP1".into()));
        assert_eq!(err.code(), "PROBE_EXHAUSTED");
    }

    #[test]
    fn probing_unknown_charge_point() {
        let (_registry, validator) = setup();
        assert_eq!(validator.probe_if_offline("GHOST"), ProbeOutcome::Unknown);
    }

    #[test]
    fn settings_update_applies_to_next_check() {
        let (registry, validator) = setup();
        let _rx = connect(&registry, "CP1", true);
        age_heartbeat(&registry, "CP1", 60);
        assert!(validator.is_online("CP1"));

        validator.update_settings(LivenessConfig {
            heartbeat_timeout_secs: 30,
            ..LivenessConfig::default()
        });
        assert!(!validator.is_online("CP1"));
    }
}
