//! Channel-backed transport
//!
//! The socket task owns the receiving half and writes frames to the wire;
//! the core only ever touches the sender, so no registry lock is held
//! across network I/O. Closing is also signalled on a `watch` channel, so a
//! close still reaches the socket task when the frame buffer is full.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::domain::{GatewayError, GatewayResult, Transport};

/// Frame handed to the socket writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFrame {
    Text(String),
    Close { code: u16, reason: String },
}

/// [`Transport`] writing into a bounded mpsc channel
#[derive(Debug)]
pub struct ChannelTransport {
    sender: mpsc::Sender<TransportFrame>,
    open: Arc<AtomicBool>,
    close_tx: watch::Sender<Option<(u16, String)>>,
}

/// Resolves once the transport is closed, independent of the frame buffer
#[derive(Debug, Clone)]
pub struct CloseSignal {
    receiver: watch::Receiver<Option<(u16, String)>>,
}

impl CloseSignal {
    /// Close code and reason; `None` if the transport was dropped unclosed.
    pub async fn wait(&mut self) -> Option<(u16, String)> {
        match self.receiver.wait_for(|close| close.is_some()).await {
            Ok(close) => close.clone(),
            Err(_) => None,
        }
    }
}

impl ChannelTransport {
    /// Create a transport and the receiver the socket task drains.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<TransportFrame>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let (close_tx, _) = watch::channel(None);
        (
            Self {
                sender,
                open: Arc::new(AtomicBool::new(true)),
                close_tx,
            },
            receiver,
        )
    }

    pub fn close_signal(&self) -> CloseSignal {
        CloseSignal {
            receiver: self.close_tx.subscribe(),
        }
    }

    /// Mark closed without emitting a close frame (peer already gone).
    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

impl Transport for ChannelTransport {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.sender.is_closed()
    }

    fn send(&self, message: String) -> GatewayResult<()> {
        if !self.is_open() {
            return Err(GatewayError::TransportClosed);
        }
        self.sender
            .try_send(TransportFrame::Text(message))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => GatewayError::TransportBackpressure,
                mpsc::error::TrySendError::Closed(_) => {
                    self.open.store(false, Ordering::SeqCst);
                    GatewayError::TransportClosed
                }
            })
    }

    fn close(&self, code: u16, reason: &str) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        debug!(code, reason, "Closing transport");
        self.close_tx.send_replace(Some((code, reason.to_string())));
        let _ = self.sender.try_send(TransportFrame::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

// ── Tests ──────────────────────────────────────────────────────
