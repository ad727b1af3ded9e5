//! Relay configuration types.
//!
//! [`RelayConfig`] is the single source of truth for all runtime settings.
//! It is built from CLI arguments in `main.rs`, or from defaults in tests.
//! No environment variables or files are read here; the binary populates the
//! struct and hands it to the server.

use std::net::{Ipv4Addr, SocketAddr};

/// Port the relay listens on when none is given.
pub const DEFAULT_PORT: u16 = 3000;

/// Request path a WebSocket upgrade must target.
pub const DEFAULT_PATH: &str = "/";

/// Number of outbound text frames that may queue for one peer before further
/// broadcasts to that peer are skipped.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

/// All runtime configuration for the relay server.
///
/// # Example
///
/// ```rust
/// use signal_relay::domain::RelayConfig;
///
/// let cfg = RelayConfig::default();
/// assert_eq!(cfg.bind_addr.port(), 3000);
/// assert_eq!(cfg.path, "/");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// The address and port the WebSocket listener binds to.
    ///
    /// Defaults to all interfaces (`0.0.0.0`).
    pub bind_addr: SocketAddr,

    /// The only request path accepted for the WebSocket upgrade.
    pub path: String,

    /// Bounded queue depth per connection.
    ///
    /// A peer that falls this many frames behind is treated as backpressured:
    /// broadcasts are skipped for it until its writer catches up.
    pub outbound_capacity: usize,
}

impl RelayConfig {
    /// Returns the default configuration listening on `port` on all interfaces.
    pub fn with_port(port: u16) -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            ..Self::default()
        }
    }
}

impl Default for RelayConfig {
    /// | Field             | Default        |
    /// |-------------------|----------------|
    /// | bind_addr         | `0.0.0.0:3000` |
    /// | path              | `/`            |
    /// | outbound_capacity | 64             |
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            path: DEFAULT_PATH.to_string(),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
