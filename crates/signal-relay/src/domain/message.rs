//! Inbound message shapes and the relay event derived from them.
//!
//! The relay is content-agnostic: it never parses a payload. What it does care
//! about is the *representation* a message arrived in, because that decides
//! how the payload is turned into the single text form that is broadcast.

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;

use super::connection::ConnectionId;

/// A blob-like payload whose bytes are not available yet.
///
/// Resolving it is the only point where processing of a single message may
/// suspend.
pub struct DeferredPayload(Pin<Box<dyn Future<Output = io::Result<Vec<u8>>> + Send>>);

impl DeferredPayload {
    /// Wraps a future that yields the payload bytes.
    pub fn new<F>(materialize: F) -> Self
    where
        F: Future<Output = io::Result<Vec<u8>>> + Send + 'static,
    {
        Self(Box::pin(materialize))
    }

    /// Waits for the payload bytes.
    ///
    /// # Errors
    ///
    /// Returns whatever I/O error the underlying source reported.
    pub async fn materialize(self) -> io::Result<Vec<u8>> {
        self.0.await
    }
}

impl fmt::Debug for DeferredPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeferredPayload(..)")
    }
}

/// One message as received from exactly one connection.
///
/// Variants are listed in the priority order used by normalization.
#[derive(Debug)]
pub enum InboundMessage {
    /// Already text; relayed as-is.
    Text(String),
    /// A complete binary buffer, decoded as UTF-8 with replacement.
    Binary(Vec<u8>),
    /// A handle whose bytes must be fetched before decoding.
    Deferred(DeferredPayload),
    /// Any other frame representation. `kind` is a label for diagnostics.
    Unrecognized { kind: &'static str },
}

impl InboundMessage {
    /// Convenience constructor for [`InboundMessage::Deferred`].
    pub fn deferred<F>(materialize: F) -> Self
    where
        F: Future<Output = io::Result<Vec<u8>>> + Send + 'static,
    {
        Self::Deferred(DeferredPayload::new(materialize))
    }

    /// Returns a short shape name for log messages.
    ///
    /// Never includes payload content.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
            Self::Deferred(_) => "deferred",
            Self::Unrecognized { kind } => *kind,
        }
    }
}

/// A normalized payload paired with the connection it came from.
///
/// Lives for exactly one fan-out pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayEvent {
    pub source: ConnectionId,
    pub text: String,
}

impl RelayEvent {
    pub fn new(source: ConnectionId, text: impl Into<String>) -> Self {
        Self {
            source,
            text: text.into(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
