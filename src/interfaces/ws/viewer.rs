//! WebSocket handler for viewers
//!
//! `GET /{charge_point_id}/{connector_id}` upgrades to a socket that receives
//! live status and telemetry for one connector. The fan-out hub writes into a
//! channel transport; this task drains it onto the wire.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::select;
use tracing::{debug, error, info, warn};

use crate::application::services::SharedGatewayService;
use crate::domain::SharedTransport;
use crate::infrastructure::transport::{ChannelTransport, TransportFrame};

/// State for the viewer WebSocket handler
#[derive(Clone)]
pub struct ViewerState {
    pub gateway: SharedGatewayService,
}

/// WebSocket upgrade handler for viewers
pub async fn ws_viewer_handler(
    ws: WebSocketUpgrade,
    State(state): State<ViewerState>,
    Path((charge_point_id, connector_id)): Path<(String, String)>,
) -> impl IntoResponse {
    // A non-numeric connector is turned away as connector 0 after the upgrade,
    // so the viewer still receives a proper error frame.
    let connector_id = connector_id.trim().parse::<u32>().unwrap_or(0);
    info!(%charge_point_id, connector_id, "New viewer WebSocket connection");

    ws.on_upgrade(move |socket| handle_viewer_socket(socket, state, charge_point_id, connector_id))
}

async fn handle_viewer_socket(socket: WebSocket, state: ViewerState, charge_point_id: String, connector_id: u32) {
    let buffer = state.gateway.fanout().config().viewer_buffer;
    let (transport, mut frames) = ChannelTransport::new(buffer);
    let mut closed = transport.close_signal();
    let transport = Arc::new(transport);
    let shared: SharedTransport = transport.clone();

    let subscription_id = state
        .gateway
        .viewer_connected(shared, &charge_point_id, connector_id)
        .ok();

    let (mut sender, mut receiver) = socket.split();

    loop {
        select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!(%charge_point_id, "Viewer sent text: {}", text.as_str());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sender.send(Message::Pong(data)).await {
                            error!("Failed to send pong: {}", e);
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!(%charge_point_id, connector_id, "Viewer sent close");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(%charge_point_id, "Viewer WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        debug!(%charge_point_id, "Viewer stream ended");
                        break;
                    }
                    _ => {}
                }
            }

            frame = frames.recv() => {
                match frame {
                    Some(TransportFrame::Text(text)) => {
                        if let Err(e) = sender.send(Message::Text(text.into())).await {
                            warn!(%charge_point_id, "Failed to write to viewer: {}", e);
                            break;
                        }
                    }
                    Some(TransportFrame::Close { code, reason }) => {
                        let close = CloseFrame { code, reason: reason.into() };
                        let _ = sender.send(Message::Close(Some(close))).await;
                        break;
                    }
                    None => break,
                }
            }

            // The close frame itself may have been dropped on a full buffer.
            close = closed.wait() => {
                while let Ok(TransportFrame::Text(text)) = frames.try_recv() {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                if let Some((code, reason)) = close {
                    let close = CloseFrame { code, reason: reason.into() };
                    let _ = sender.send(Message::Close(Some(close))).await;
                }
                break;
            }
        }
    }

    transport.mark_closed();
    if let Some(id) = subscription_id {
        // Already gone when the hub purged or closed it.
        let _ = state.gateway.viewer_disconnected(&id);
    }
    info!(%charge_point_id, connector_id, "Viewer WebSocket disconnected");
}
