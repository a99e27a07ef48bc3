//! Health Monitor Service
//!
//! Periodically reports aggregate session statistics, flags charge points
//! that went quiet and optionally evicts stale registry entries.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::application::services::liveness::SharedLivenessValidator;
use crate::application::session::{SessionSnapshot, SharedGatewayRegistry};
use crate::support::shutdown::ShutdownSignal;

/// Configuration for health monitoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// How often the report runs (seconds)
    pub interval_secs: u64,
    /// Heartbeat age that gets a charge point flagged (seconds)
    pub heartbeat_warning_secs: u64,
    /// Inactivity that gets a charge point flagged as stale (seconds)
    pub stale_warning_secs: u64,
    /// Evict stale entries after each report
    pub auto_cleanup: bool,
    /// Inactivity after which an entry is evicted (seconds)
    pub cleanup_after_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            heartbeat_warning_secs: 120,
            stale_warning_secs: 300,
            auto_cleanup: true,
            cleanup_after_secs: 600,
        }
    }
}

/// Aggregate snapshot produced on every tick
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub timestamp: DateTime<Utc>,
    pub total_charge_points: usize,
    pub authenticated_charge_points: usize,
    pub online_charge_points: usize,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub average_connection_seconds: i64,
    /// Charge points whose last heartbeat is older than the warning threshold
    pub without_recent_heartbeat: Vec<String>,
    /// Charge points with no inbound activity for the stale threshold
    pub stale: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unauthenticated,
    Stale,
    NoHeartbeat,
    Disconnected,
}

/// Per charge point health verdict
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargePointHealth {
    pub charge_point_id: String,
    /// Most severe problem found
    pub status: HealthStatus,
    pub issues: Vec<String>,
    pub is_authenticated: bool,
    pub connection_seconds: i64,
    pub seconds_since_last_seen: i64,
    pub seconds_since_heartbeat: i64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub pending_messages: usize,
}

/// Health Monitor Service
pub struct HealthMonitor {
    registry: SharedGatewayRegistry,
    validator: SharedLivenessValidator,
    config: HealthConfig,
    running: Arc<RwLock<bool>>,
}

impl HealthMonitor {
    pub fn new(registry: SharedGatewayRegistry, validator: SharedLivenessValidator) -> Self {
        Self {
            registry,
            validator,
            config: HealthConfig::default(),
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub fn with_config(mut self, config: HealthConfig) -> Self {
        self.config = config;
        self
    }

    /// Start the health monitor background task
    pub fn start(self: &Arc<Self>, shutdown: ShutdownSignal) {
        let monitor = self.clone();

        tokio::spawn(async move {
            *monitor.running.write().await = true;
            info!(
                "🩺 Health monitor started (interval: {}s, auto cleanup: {})",
                monitor.config.interval_secs, monitor.config.auto_cleanup
            );

            let mut interval = tokio::time::interval(Duration::from_secs(monitor.config.interval_secs.max(1)));

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        monitor.run_check();
                    }
                    _ = shutdown.notified().wait() => {
                        info!("🩺 Health monitor shutting down");
                        break;
                    }
                }
            }

            *monitor.running.write().await = false;
            info!("🩺 Health monitor stopped");
        });
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// One monitoring pass: report, log, record gauges, maybe evict.
    pub fn run_check(&self) -> HealthReport {
        let report = self.report();

        info!(
            total = report.total_charge_points,
            authenticated = report.authenticated_charge_points,
            online = report.online_charge_points,
            messages_sent = report.messages_sent,
            messages_received = report.messages_received,
            avg_connection_secs = report.average_connection_seconds,
            "🩺 Gateway health check"
        );
        if !report.stale.is_empty() {
            warn!(count = report.stale.len(), charge_points = ?report.stale, "⚠️ Stale charge points");
        }
        if !report.without_recent_heartbeat.is_empty() {
            warn!(
                count = report.without_recent_heartbeat.len(),
                charge_points = ?report.without_recent_heartbeat,
                "💔 Charge points without recent heartbeat"
            );
        }

        metrics::gauge!("gateway_charge_points").set(report.total_charge_points as f64);
        metrics::gauge!("gateway_charge_points_online").set(report.online_charge_points as f64);
        metrics::gauge!("gateway_charge_points_authenticated").set(report.authenticated_charge_points as f64);
        metrics::gauge!("gateway_charge_points_stale").set(report.stale.len() as f64);

        if self.config.auto_cleanup {
            let removed = self
                .registry
                .cleanup_stale(Duration::from_secs(self.config.cleanup_after_secs));
            if removed > 0 {
                info!(removed, "🧹 Health monitor evicted stale charge points");
            }
        }

        report
    }

    pub fn report(&self) -> HealthReport {
        let now = Utc::now();
        let stats = self.registry.stats(Duration::from_secs(self.config.heartbeat_warning_secs));
        let snapshots = self.registry.snapshots();

        let older_than = |at: DateTime<Utc>, secs: u64| {
            now.signed_duration_since(at).num_seconds() > i64::try_from(secs).unwrap_or(i64::MAX)
        };

        HealthReport {
            timestamp: now,
            total_charge_points: stats.total_charge_points,
            authenticated_charge_points: stats.authenticated_charge_points,
            online_charge_points: snapshots
                .iter()
                .filter(|s| self.validator.validate(&s.charge_point_id, 1).is_online)
                .count(),
            messages_sent: stats.messages_sent,
            messages_received: stats.messages_received,
            average_connection_seconds: stats.average_connection_seconds,
            without_recent_heartbeat: snapshots
                .iter()
                .filter(|s| older_than(s.last_heartbeat_at, self.config.heartbeat_warning_secs))
                .map(|s| s.charge_point_id.clone())
                .collect(),
            stale: snapshots
                .iter()
                .filter(|s| older_than(s.last_seen_at, self.config.stale_warning_secs))
                .map(|s| s.charge_point_id.clone())
                .collect(),
        }
    }

    /// Health verdict for one charge point, `None` when unknown.
    pub fn check_charge_point_health(&self, charge_point_id: &str) -> Option<ChargePointHealth> {
        let snapshot = self.registry.snapshot(charge_point_id)?;
        let pending_messages = self.registry.pending_count(charge_point_id);
        Some(assess(&snapshot, pending_messages, &self.config, Utc::now()))
    }

    /// Send a Heartbeat request to every authenticated charge point.
    /// Returns how many were sent.
    pub fn ping_all(&self) -> usize {
        let message = serde_json::json!([
            2,
            format!("ping-{}", Utc::now().timestamp_millis()),
            "Heartbeat",
            {}
        ])
        .to_string();

        let sent = self
            .registry
            .snapshots()
            .into_iter()
            .filter(|s| s.is_authenticated)
            .filter(|s| match self.registry.send(&s.charge_point_id, message.clone()) {
                Ok(()) => {
                    debug!(charge_point_id = %s.charge_point_id, "Ping sent");
                    true
                }
                Err(_) => false,
            })
            .count();

        info!(sent, "📡 Pinged charge points");
        sent
    }
}

fn assess(snapshot: &SessionSnapshot, pending_messages: usize, config: &HealthConfig, now: DateTime<Utc>) -> ChargePointHealth {
    let since_seen = now.signed_duration_since(snapshot.last_seen_at).num_seconds();
    let since_heartbeat = now.signed_duration_since(snapshot.last_heartbeat_at).num_seconds();

    let mut status = HealthStatus::Healthy;
    let mut issues = Vec::new();

    // Checked from least to most severe; the last hit wins.
    if !snapshot.is_authenticated {
        status = HealthStatus::Unauthenticated;
        issues.push("Not authenticated".to_string());
    }
    if since_seen > i64::try_from(config.stale_warning_secs).unwrap_or(i64::MAX) {
        status = HealthStatus::Stale;
        issues.push(format!("No activity for {}s", since_seen));
    }
    if since_heartbeat > i64::try_from(config.heartbeat_warning_secs).unwrap_or(i64::MAX) {
        status = HealthStatus::NoHeartbeat;
        issues.push(format!("No heartbeat for {}s", since_heartbeat));
    }
    if !snapshot.transport_open {
        status = HealthStatus::Disconnected;
        issues.push("Transport closed".to_string());
    }

    ChargePointHealth {
        charge_point_id: snapshot.charge_point_id.clone(),
        status,
        issues,
        is_authenticated: snapshot.is_authenticated,
        connection_seconds: now.signed_duration_since(snapshot.connected_at).num_seconds(),
        seconds_since_last_seen: since_seen,
        seconds_since_heartbeat: since_heartbeat,
        messages_sent: snapshot.messages_sent,
        messages_received: snapshot.messages_received,
        pending_messages,
    }
}

// ── Tests ──────────────────────────────────────────────────────
