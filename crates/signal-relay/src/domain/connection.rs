//! Connection identity and lifecycle state.

use std::fmt;

use uuid::Uuid;

/// Transient identity of one accepted client session.
///
/// A fresh identity is minted for every accepted connection; a peer that
/// reconnects never gets its old identity back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Mints a new random identity.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The first UUID group is plenty to tell sessions apart in logs.
        let s = self.0.simple().to_string();
        f.write_str(&s[..8])
    }
}

/// Lifecycle state of a registered connection.
///
/// ```text
/// (connecting) ──handshake──▶ Open ──close frame──▶ Closing ──▶ Closed
///                              │                                  ▲
///                              └────── read/write error ──────────┘
/// ```
///
/// `connecting` is never observable: a connection is only built once the
/// WebSocket handshake has completed. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Inbound messages are processed and the connection is a fan-out target.
    Open = 0,
    /// A close has been requested; no more broadcasts are written to it.
    Closing = 1,
    /// Terminal.
    Closed = 2,
}

impl ConnectionState {
    /// Decodes the `repr(u8)` form used for atomic storage.
    ///
    /// Unknown values map to `Closed` so a corrupted state is never writable.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Open,
            1 => Self::Closing,
            _ => Self::Closed,
        }
    }

    /// Returns `true` if the connection may receive broadcasts.
    pub fn is_open(self) -> bool {
        self == Self::Open
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_connection_id_display_is_short_prefix() {
        // Arrange
        let id = ConnectionId::new();

        // Act
        let shown = id.to_string();

        // Assert: 8 hex chars taken from the start of the UUID
        assert_eq!(shown.len(), 8);
        assert!(id.as_uuid().simple().to_string().starts_with(&shown));
    }

    #[test]
    fn test_state_round_trips_through_u8() {
        for state in [
            ConnectionState::Open,
            ConnectionState::Closing,
            ConnectionState::Closed,
        ] {
            assert_eq!(ConnectionState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn test_unknown_state_byte_is_closed() {
        assert_eq!(ConnectionState::from_u8(200), ConnectionState::Closed);
    }

    #[test]
    fn test_only_open_is_open() {
        assert!(ConnectionState::Open.is_open());
        assert!(!ConnectionState::Closing.is_open());
        assert!(!ConnectionState::Closed.is_open());
    }
}
