//! Infrastructure layer for signal-relay.
//!
//! # Responsibilities
//!
//! - Binding the TCP listener and accepting connections
//! - Performing the WebSocket HTTP upgrade handshake (root path only)
//! - Spawning one session task and one writer task per connection
//! - Closing every connection on graceful shutdown
//!
//! # What does NOT belong here?
//!
//! - Fan-out policy (that is the application layer)
//! - Configuration parsing (that is done in `main.rs`)

pub mod outbound;
pub mod ws_server;

pub use outbound::{write_outbound, ChannelOutbound};
pub use ws_server::{run_server, RelayServer};
