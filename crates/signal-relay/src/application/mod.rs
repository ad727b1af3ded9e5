//! Application layer for signal-relay.
//!
//! # Responsibilities
//!
//! - Tracking live connections ([`ConnectionRegistry`])
//! - Normalizing inbound payloads to text ([`normalize`])
//! - Broadcasting to every peer but the sender ([`RelayEngine`])
//!
//! # What does NOT belong here?
//!
//! - Opening sockets or listening for connections (that is infrastructure)
//! - Tokio task spawning (that happens in the infrastructure layer)
//! - WebSocket framing (handled by tokio-tungstenite)

pub mod connection;
pub mod registry;
pub mod relay_engine;

pub use connection::{Connection, Delivery, DeliveryError, Outbound};
pub use registry::ConnectionRegistry;
pub use relay_engine::{normalize, FanOutReport, RelayEngine, RelayError, RelayOutcome};
