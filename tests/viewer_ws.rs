//! End-to-end viewer WebSocket tests against a running gateway.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use charge_gateway::config::AppConfig;
use charge_gateway::domain::{ConnectorStatus, MeterSample, MeterValue, SharedTransport};
use charge_gateway::infrastructure::transport::{ChannelTransport, TransportFrame};
use charge_gateway::server::{ServerHandle, ServerOptions};

async fn start_server() -> ServerHandle {
    let mut config = AppConfig::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;
    config.metrics.enabled = false;
    ServerHandle::start(ServerOptions { config }).await.unwrap()
}

/// Register an authenticated charge point with two connectors. The returned
/// receiver must stay alive or the transport reports closed.
fn connect_charge_point(handle: &ServerHandle, id: &str) -> mpsc::Receiver<TransportFrame> {
    let (transport, frames) = ChannelTransport::new(16);
    let transport: SharedTransport = Arc::new(transport);
    let gateway = &handle.gateway;
    gateway.charge_point_connected(id, "SN-001", transport, "ocpp1.6").unwrap();
    gateway.boot_authenticated(id).unwrap();
    gateway
        .status_notification_received(id, 1, ConnectorStatus::Available, None)
        .unwrap();
    gateway
        .status_notification_received(id, 2, ConnectorStatus::Available, None)
        .unwrap();
    frames
}

/// Let the fan-out loop drain registration events before a viewer joins.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

async fn next_json<S>(ws: &mut S) -> Value
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn next_close<S>(ws: &mut S) -> u16
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for close")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Close(frame) = msg {
            return frame.map(|f| u16::from(f.code)).unwrap_or(0);
        }
    }
}

#[tokio::test]
async fn subscribed_viewer_receives_snapshot_and_live_updates() {
    let handle = start_server().await;
    let _cp_frames = connect_charge_point(&handle, "CP-E2E-1");
    settle().await;

    let url = format!("ws://{}/CP-E2E-1/1", handle.local_addr());
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    let snapshot = next_json(&mut ws).await;
    assert_eq!(snapshot["type"], "status");
    assert_eq!(snapshot["data"]["chargePointId"], "CP-E2E-1");
    assert_eq!(snapshot["data"]["connectorId"], 1);
    assert_eq!(snapshot["data"]["status"], "Available");
    assert_eq!(snapshot["data"]["isOnline"], true);

    handle
        .gateway
        .status_notification_received("CP-E2E-1", 1, ConnectorStatus::Charging, None)
        .unwrap();
    let update = next_json(&mut ws).await;
    assert_eq!(update["type"], "status");
    assert_eq!(update["data"]["status"], "Charging");

    // Other connectors never reach this viewer.
    handle
        .gateway
        .status_notification_received("CP-E2E-1", 2, ConnectorStatus::Faulted, None)
        .unwrap();
    let meter = MeterValue::new(
        "2026-01-01T10:00:00Z",
        vec![MeterSample::new("7.4")
            .with_measurand("Power.Active.Import")
            .with_unit("kW")],
    );
    handle
        .gateway
        .meter_values_received("CP-E2E-1", 1, &[meter], None)
        .unwrap();
    let telemetry = next_json(&mut ws).await;
    assert_eq!(telemetry["type"], "charging_data");
    assert_eq!(telemetry["data"]["connectorId"], 1);
    assert_eq!(telemetry["data"]["currentPower"], 7.4);

    assert_eq!(handle.gateway.fanout().active_count(), 1);
    handle.shutdown().await;
}

#[tokio::test]
async fn unknown_charge_point_is_rejected_with_policy_close() {
    let handle = start_server().await;

    let url = format!("ws://{}/CP-MISSING/1", handle.local_addr());
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    let error = next_json(&mut ws).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["data"]["code"], "SESSION_NOT_FOUND");
    assert_eq!(next_close(&mut ws).await, 1008);

    assert_eq!(handle.gateway.fanout().len(), 0);
    handle.shutdown().await;
}

#[tokio::test]
async fn connector_out_of_range_is_rejected() {
    let handle = start_server().await;
    let _cp_frames = connect_charge_point(&handle, "CP-E2E-2");

    let url = format!("ws://{}/CP-E2E-2/7", handle.local_addr());
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    let error = next_json(&mut ws).await;
    assert_eq!(error["data"]["code"], "CONNECTOR_NOT_FOUND");
    assert_eq!(next_close(&mut ws).await, 1008);
    handle.shutdown().await;
}

#[tokio::test]
async fn connector_zero_is_rejected() {
    let handle = start_server().await;
    let _cp_frames = connect_charge_point(&handle, "CP-E2E-3");

    let url = format!("ws://{}/CP-E2E-3/0", handle.local_addr());
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    let error = next_json(&mut ws).await;
    assert_eq!(error["data"]["code"], "INVALID_CONNECTOR");

    assert_eq!(handle.gateway.stats().registry.total_charge_points, 1);
    handle.shutdown().await;
}
