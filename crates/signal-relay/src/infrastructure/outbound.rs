//! Channel-backed outbound path for one WebSocket connection.
//!
//! Fan-out never touches a socket. It pushes text into a bounded
//! `tokio::sync::mpsc` queue through [`ChannelOutbound`]; a dedicated writer
//! task ([`write_outbound`]) owns the WebSocket sink and drains the queue.
//!
//! ```text
//! RelayEngine ──try_send──▶ [ mpsc queue ] ──recv──▶ write_outbound ──▶ WebSocket sink
//! ```
//!
//! Dropping the sender (via [`Outbound::shutdown`]) ends the writer, which
//! then sends a Close frame.

use std::sync::{Mutex, MutexGuard, PoisonError};

use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::debug;

use crate::application::{DeliveryError, Outbound};
use crate::domain::ConnectionId;

/// [`Outbound`] implementation over a bounded mpsc sender.
#[derive(Debug)]
pub struct ChannelOutbound {
    // `None` once shut down.
    tx: Mutex<Option<mpsc::Sender<String>>>,
}

impl ChannelOutbound {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }

    /// Creates an outbound path and the receiver its writer task drains.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero (a tokio bounded channel requirement).
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    fn sender(&self) -> MutexGuard<'_, Option<mpsc::Sender<String>>> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Outbound for ChannelOutbound {
    fn try_deliver(&self, text: &str) -> Result<(), DeliveryError> {
        let guard = self.sender();
        let Some(tx) = guard.as_ref() else {
            return Err(DeliveryError::Closed);
        };

        tx.try_send(text.to_owned()).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    fn is_closed(&self) -> bool {
        self.sender().as_ref().map_or(true, |tx| tx.is_closed())
    }

    fn shutdown(&self) {
        self.sender().take();
    }
}

/// Drains `rx` into `sink` as text frames, then sends a Close frame.
///
/// Runs as the per-connection writer task and is the only code that writes to
/// the connection's WebSocket sink.
///
/// # Errors
///
/// Returns the first WebSocket error; the caller treats it as the connection
/// having gone away.
pub async fn write_outbound<S>(
    mut sink: S,
    mut rx: mpsc::Receiver<String>,
    id: ConnectionId,
) -> Result<(), WsError>
where
    S: Sink<WsMessage, Error = WsError> + Unpin,
{
    while let Some(text) = rx.recv().await {
        sink.send(WsMessage::Text(text)).await?;
    }

    debug!("connection {id}: outbound queue closed, sending Close frame");
    sink.send(WsMessage::Close(None)).await
}

// ── Tests ─────────────────────────────────────────────────────────────────────
