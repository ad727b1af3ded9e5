//! Domain layer for signal-relay.
//!
//! The domain layer contains pure types that have no dependencies on I/O,
//! networking, or external frameworks.
//!
//! # What belongs in the domain layer?
//!
//! - Configuration structures
//! - Connection identity and lifecycle state
//! - The shapes an inbound message can take, and the relay event built from it
//!
//! # What does NOT belong here?
//!
//! - Any `tokio`, `TcpStream`, or `WebSocket` types
//! - Environment variable reading or CLI parsing
//! - Anything that could block or fail due to external state

pub mod config;
pub mod connection;
pub mod message;

// Re-export the most commonly needed types at the domain module boundary
// so callers can write `domain::RelayConfig` instead of the longer path.
pub use config::RelayConfig;
pub use connection::{ConnectionId, ConnectionState};
pub use message::{DeferredPayload, InboundMessage, RelayEvent};
