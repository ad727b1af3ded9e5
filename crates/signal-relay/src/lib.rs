//! signal-relay library crate.
//!
//! A WebSocket relay that forwards every message it receives from one client
//! to all other connected clients. Peers use it as a rendezvous point to swap
//! signaling messages before opening a direct media session; the relay never
//! looks inside those messages.
//!
//! # Architecture
//!
//! ```text
//! Client A ─┐                                   ┌─▶ Client B
//!           │  ws_server ─▶ RelayEngine ─▶ ConnectionRegistry
//! Client C ─┘   (ingest)     (normalize,        (peers ≠ source)
//!                             fan-out)          └─▶ Client C
//!
//! [signal-relay]
//!   ├── domain/           Pure types: RelayConfig, ConnectionId, InboundMessage
//!   ├── application/      ConnectionRegistry, RelayEngine, normalize
//!   └── infrastructure/
//!         ├── ws_server/  Accept loop and per-connection sessions (tokio-tungstenite)
//!         └── outbound/   Channel-backed per-connection writer
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async runtime.
//! - `application` depends on `domain` only; it never touches a socket.
//! - `infrastructure` depends on all other layers plus `tokio` and `tungstenite`.

/// Domain layer: pure types (no I/O).
pub mod domain;

/// Application layer: registry, normalization, and fan-out.
pub mod application;

/// Infrastructure layer: WebSocket server.
pub mod infrastructure;
