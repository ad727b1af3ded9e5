//! The connection registry: the live set of peers eligible for broadcast.
//!
//! The registry is the only shared mutable state in the relay. Every critical
//! section is a pure map mutation or a snapshot copy of `Arc` handles; nothing
//! is written to a socket while the lock is held.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use super::connection::Connection;
use crate::domain::{ConnectionId, ConnectionState};

/// Tracks every connection between "accepted" and "closed".
///
/// Construct one per server and share it as `Arc<ConnectionRegistry>`.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    connections: HashMap<ConnectionId, Arc<Connection>>,
    // Set by `close_all`; checked under the same lock as every insert.
    shut_down: bool,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a newly accepted connection.
    ///
    /// Returns `false` (and changes nothing) if the identity is already
    /// present, the connection has already reached `Closed`, or the registry
    /// has been shut down by [`close_all`](Self::close_all).
    pub fn add(&self, connection: Arc<Connection>) -> bool {
        if connection.state() == ConnectionState::Closed {
            debug!("connection {} already closed; not registering", connection.id());
            return false;
        }

        let mut inner = self.write();
        if inner.shut_down {
            debug!("registry shut down; not registering {}", connection.id());
            return false;
        }
        if inner.connections.contains_key(&connection.id()) {
            return false;
        }
        inner.connections.insert(connection.id(), connection);
        true
    }

    /// Removes a connection. Removing an absent identity is a no-op.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.write().connections.remove(&id)
    }

    /// Calls `visit` once for every registered connection except `source`.
    ///
    /// Order is unspecified. The visit runs on a snapshot taken under the read
    /// lock, so connections may have changed state by the time they are visited.
    pub fn for_each_except<F>(&self, source: ConnectionId, mut visit: F)
    where
        F: FnMut(&Arc<Connection>),
    {
        let peers: Vec<Arc<Connection>> = self
            .read()
            .connections
            .iter()
            .filter(|(id, _)| **id != source)
            .map(|(_, conn)| Arc::clone(conn))
            .collect();

        for peer in &peers {
            visit(peer);
        }
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.read().connections.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.read().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().connections.is_empty()
    }

    /// Identities currently registered, in no particular order.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.read().connections.keys().copied().collect()
    }

    /// Returns `true` once [`close_all`](Self::close_all) has run.
    pub fn is_shut_down(&self) -> bool {
        self.read().shut_down
    }

    /// Closes and unregisters every connection. Returns how many were closed.
    ///
    /// Used on process shutdown. Afterwards the registry refuses new entries,
    /// so a session finishing its handshake late cannot slip back in.
    pub fn close_all(&self) -> usize {
        let drained: Vec<Arc<Connection>> = {
            let mut inner = self.write();
            inner.shut_down = true;
            inner.connections.drain().map(|(_, c)| c).collect()
        };
        for conn in &drained {
            conn.close();
        }
        drained.len()
    }

    // A panic while holding the lock cannot leave the map half-updated (every
    // critical section is a single map call), so a poisoned lock is still usable.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
