//! A viewer watching one (charge point, connector) pair

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::application::fanout::messages::ViewerMessage;
use crate::domain::{GatewayResult, SharedTransport};

pub struct ViewerSubscription {
    pub subscription_id: String,
    pub charge_point_id: String,
    pub connector_id: u32,
    pub transport: SharedTransport,
    pub connected_at: DateTime<Utc>,
    last_activity_ms: AtomicI64,
    active: AtomicBool,
}

impl ViewerSubscription {
    pub fn new(charge_point_id: &str, connector_id: u32, transport: SharedTransport) -> Self {
        let now = Utc::now();
        Self {
            subscription_id: uuid::Uuid::new_v4().to_string(),
            charge_point_id: charge_point_id.to_string(),
            connector_id,
            transport,
            connected_at: now,
            last_activity_ms: AtomicI64::new(now.timestamp_millis()),
            active: AtomicBool::new(true),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst) && self.transport.is_open()
    }

    pub fn mark_inactive(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn last_activity_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_activity_ms.load(Ordering::SeqCst))
            .unwrap_or(self.connected_at)
    }

    /// Whether a frame scoped to `connector_id` (or to the whole charge
    /// point when `None`) concerns this viewer.
    pub fn matches(&self, charge_point_id: &str, connector_id: Option<u32>) -> bool {
        self.charge_point_id == charge_point_id && connector_id.map_or(true, |id| id == self.connector_id)
    }

    /// Push one frame. A failed send deactivates the subscription; it is
    /// purged on the next maintenance tick.
    pub fn deliver(&self, message: &ViewerMessage) -> GatewayResult<()> {
        match self.transport.send(message.to_json()) {
            Ok(()) => {
                self.last_activity_ms
                    .fetch_max(Utc::now().timestamp_millis(), Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                warn!(
                    subscription_id = %self.subscription_id,
                    charge_point_id = %self.charge_point_id,
                    connector_id = self.connector_id,
                    kind = message.kind(),
                    error = %e,
                    "Viewer send failed, marking subscription inactive"
                );
                metrics::counter!("gateway_viewer_send_failures_total").increment(1);
                self.mark_inactive();
                Err(e)
            }
        }
    }

    pub fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            subscription_id: self.subscription_id.clone(),
            charge_point_id: self.charge_point_id.clone(),
            connector_id: self.connector_id,
            connected_at: self.connected_at,
            last_activity_at: self.last_activity_at(),
            is_active: self.is_active(),
        }
    }
}

impl std::fmt::Debug for ViewerSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewerSubscription")
            .field("subscription_id", &self.subscription_id)
            .field("charge_point_id", &self.charge_point_id)
            .field("connector_id", &self.connector_id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionInfo {
    pub subscription_id: String,
    pub charge_point_id: String,
    pub connector_id: u32,
    pub connected_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub is_active: bool,
}
