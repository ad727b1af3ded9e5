//! A registered client connection and its outbound write seam.
//!
//! The [`Outbound`] trait is the only thing the relay needs from a transport:
//! a non-blocking "queue this text" call and a way to tell whether the path
//! is still alive. The WebSocket implementation lives in the infrastructure
//! layer; tests use the `mockall` generated `MockOutbound`.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};

use thiserror::Error;

use crate::domain::{ConnectionId, ConnectionState};

/// Why a text frame could not be queued for a peer.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The peer is backpressured; this frame is skipped.
    #[error("outbound queue is full")]
    Full,

    /// The peer's writer has gone away.
    #[error("outbound path is closed")]
    Closed,
}

/// Per-connection write capability.
///
/// Implementations must never block: fan-out calls `try_deliver` for every
/// peer in turn, and one slow peer must not hold up the rest.
#[cfg_attr(test, mockall::automock)]
pub trait Outbound: Send + Sync {
    /// Queues one text frame for the peer.
    ///
    /// # Errors
    ///
    /// [`DeliveryError::Full`] if the peer is backpressured,
    /// [`DeliveryError::Closed`] if the peer's writer is gone.
    fn try_deliver(&self, text: &str) -> Result<(), DeliveryError>;

    /// Returns `true` once the outbound path can no longer accept frames.
    fn is_closed(&self) -> bool;

    /// Asks the writer to send a Close frame and stop.
    fn shutdown(&self);
}

/// Result of offering one frame to one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Not writable right now (closing, closed, or backpressured).
    Skipped,
    /// The write failed; the connection is now `Closed`.
    Failed,
}

/// One accepted client session.
pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    state: AtomicU8,
    outbound: Box<dyn Outbound>,
}

impl Connection {
    /// Builds an `Open` connection with a freshly minted identity.
    pub fn new(peer_addr: SocketAddr, outbound: Box<dyn Outbound>) -> Self {
        Self {
            id: ConnectionId::new(),
            peer_addr,
            state: AtomicU8::new(ConnectionState::Open as u8),
            outbound,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Moves `Open` to `Closing`. Returns `false` if the connection was not open.
    pub fn mark_closing(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Open as u8,
                ConnectionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Moves to the terminal `Closed` state and returns the previous state.
    pub fn mark_closed(&self) -> ConnectionState {
        ConnectionState::from_u8(
            self.state
                .swap(ConnectionState::Closed as u8, Ordering::AcqRel),
        )
    }

    /// Returns `true` if a broadcast written now has a chance of reaching the peer.
    pub fn is_writable(&self) -> bool {
        self.state().is_open() && !self.outbound.is_closed()
    }

    /// Offers `text` to the peer.
    ///
    /// Writability is checked immediately before the write, and a write that
    /// fails because the outbound path is gone closes the connection.
    pub fn send_text(&self, text: &str) -> Delivery {
        if !self.is_writable() {
            return Delivery::Skipped;
        }

        match self.outbound.try_deliver(text) {
            Ok(()) => Delivery::Delivered,
            Err(DeliveryError::Full) => Delivery::Skipped,
            Err(DeliveryError::Closed) => {
                self.mark_closed();
                Delivery::Failed
            }
        }
    }

    /// Starts a relay-initiated close: no further broadcasts, writer told to stop.
    pub fn close(&self) {
        self.mark_closing();
        self.outbound.shutdown();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
