//! Relay engine: payload normalization and fan-out.
//!
//! ```text
//! InboundMessage ──normalize()──▶ RelayEvent ──fan_out()──▶ every peer ≠ source
//! ```
//!
//! Normalization turns whatever representation a frame arrived in into one
//! canonical text string (or drops it). Fan-out offers that string to every
//! registered peer except the sender, checking writability per peer at the
//! moment of the write and isolating failures to the peer that caused them.

use std::io;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::connection::Delivery;
use super::registry::ConnectionRegistry;
use crate::domain::{ConnectionId, InboundMessage, RelayEvent};

// ── Error type ────────────────────────────────────────────────────────────────

/// Why an inbound message produced no broadcast.
///
/// None of these is ever reported back to the sender; they are logged and the
/// message is dropped.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The frame was not text, binary, or a deferred blob.
    #[error("unrecognized message shape: {0}")]
    UnrecognizedShape(&'static str),

    /// A deferred payload could not be fetched.
    #[error("failed to materialize deferred payload: {0}")]
    Materialization(#[source] io::Error),
}

// ── Normalization ─────────────────────────────────────────────────────────────

/// Produces the canonical text form of an inbound message.
///
/// | Shape          | Result                                             |
/// |----------------|----------------------------------------------------|
/// | `Text`         | unchanged                                          |
/// | `Binary`       | UTF-8 decoded, invalid sequences become U+FFFD      |
/// | `Deferred`     | awaited, then decoded like `Binary`                |
/// | `Unrecognized` | [`RelayError::UnrecognizedShape`]                  |
///
/// Only the `Deferred` arm suspends.
///
/// # Errors
///
/// See [`RelayError`].
///
/// # Example
///
/// ```rust
/// # tokio_test::block_on(async {
/// use signal_relay::application::normalize;
/// use signal_relay::domain::InboundMessage;
///
/// let text = normalize(InboundMessage::Binary(b"offer".to_vec())).await.unwrap();
/// assert_eq!(text, "offer");
/// # });
/// ```
pub async fn normalize(message: InboundMessage) -> Result<String, RelayError> {
    match message {
        InboundMessage::Text(text) => Ok(text),
        InboundMessage::Binary(bytes) => Ok(decode_utf8_lossy(bytes)),
        InboundMessage::Deferred(payload) => {
            let bytes = payload
                .materialize()
                .await
                .map_err(RelayError::Materialization)?;
            Ok(decode_utf8_lossy(bytes))
        }
        InboundMessage::Unrecognized { kind } => Err(RelayError::UnrecognizedShape(kind)),
    }
}

/// Decodes without copying when the bytes are already valid UTF-8.
fn decode_utf8_lossy(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes)
        .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

// ── Fan-out ───────────────────────────────────────────────────────────────────

/// Per-peer tally of one fan-out pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub delivered: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl FanOutReport {
    /// Number of peers that were considered.
    pub fn peers(&self) -> usize {
        self.delivered + self.skipped + self.failed
    }
}

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Broadcast(FanOutReport),
    Dropped,
}

/// Ingests messages and broadcasts them over a shared registry.
#[derive(Debug, Clone)]
pub struct RelayEngine {
    registry: Arc<ConnectionRegistry>,
}

impl RelayEngine {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Normalizes one message from `source` and, unless dropped, fans it out.
    ///
    /// The caller awaits this before reading the next frame from the same
    /// connection, which keeps each connection's stream in order.
    pub async fn ingest(&self, source: ConnectionId, message: InboundMessage) -> RelayOutcome {
        let kind = message.kind();
        info!("connection {source}: received {kind} message");

        match normalize(message).await {
            Ok(text) => RelayOutcome::Broadcast(self.fan_out(&RelayEvent::new(source, text))),
            Err(e @ RelayError::UnrecognizedShape(_)) => {
                info!("connection {source}: dropping message: {e}");
                RelayOutcome::Dropped
            }
            Err(e) => {
                warn!("connection {source}: dropping message: {e}");
                RelayOutcome::Dropped
            }
        }
    }

    /// Offers `event.text` to every registered peer except `event.source`.
    ///
    /// Peers that are not writable are skipped. A peer whose write fails is
    /// removed from the registry; the pass carries on with the others.
    pub fn fan_out(&self, event: &RelayEvent) -> FanOutReport {
        let mut report = FanOutReport::default();
        let mut failed = Vec::new();

        self.registry.for_each_except(event.source, |peer| {
            match peer.send_text(&event.text) {
                Delivery::Delivered => report.delivered += 1,
                Delivery::Skipped => {
                    debug!("connection {} ({}): not writable, skipped", peer.id(), peer.state());
                    report.skipped += 1;
                }
                Delivery::Failed => {
                    warn!("connection {}: write failed, removing", peer.id());
                    report.failed += 1;
                    failed.push(peer.id());
                }
            }
        });

        for id in failed {
            self.registry.remove(id);
        }

        debug!(
            "connection {}: fan-out delivered={} skipped={} failed={}",
            event.source, report.delivered, report.skipped, report.failed
        );
        report
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::connection::{Connection, DeliveryError, MockOutbound};
    use mockall::predicate::eq;
    use std::net::SocketAddr;
    use tokio::sync::oneshot;
    use tokio_test::{assert_pending, assert_ready};

    fn addr() -> SocketAddr {
        "127.0.0.1:41000".parse().unwrap()
    }

    /// A peer that expects exactly `times` deliveries of `text`.
    fn expecting(text: &'static str, times: usize) -> Arc<Connection> {
        let mut outbound = MockOutbound::new();
        outbound.expect_is_closed().return_const(false);
        outbound
            .expect_try_deliver()
            .with(eq(text))
            .times(times)
            .returning(|_| Ok(()));
        Arc::new(Connection::new(addr(), Box::new(outbound)))
    }

    /// A peer that must never be written to.
    fn silent() -> Arc<Connection> {
        let mut outbound = MockOutbound::new();
        outbound.expect_is_closed().return_const(false);
        outbound.expect_try_deliver().never();
        Arc::new(Connection::new(addr(), Box::new(outbound)))
    }

    fn broken() -> Arc<Connection> {
        let mut outbound = MockOutbound::new();
        outbound.expect_is_closed().return_const(false);
        outbound
            .expect_try_deliver()
            .returning(|_| Err(DeliveryError::Closed));
        Arc::new(Connection::new(addr(), Box::new(outbound)))
    }

    fn engine_with(peers: &[&Arc<Connection>]) -> RelayEngine {
        let registry = Arc::new(ConnectionRegistry::new());
        for p in peers {
            registry.add(Arc::clone(p));
        }
        RelayEngine::new(registry)
    }

    // ── normalize ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_normalize_text_is_unchanged() {
        let text = normalize(InboundMessage::Text("v=0\r\no=- 1".to_string()))
            .await
            .unwrap();
        assert_eq!(text, "v=0\r\no=- 1");
    }

    #[tokio::test]
    async fn test_normalize_valid_utf8_binary_matches_text() {
        // Arrange
        let original = "{\"type\":\"offer\",\"sdp\":\"héllo ✓\"}";

        // Act
        let text = normalize(InboundMessage::Binary(original.as_bytes().to_vec()))
            .await
            .unwrap();

        // Assert
        assert_eq!(text, original);
    }

    #[tokio::test]
    async fn test_normalize_invalid_utf8_uses_replacement_char() {
        let bytes = vec![b'a', 0xFF, b'b', 0xC3];
        let text = normalize(InboundMessage::Binary(bytes)).await.unwrap();
        assert_eq!(text, "a\u{FFFD}b\u{FFFD}");
    }

    #[tokio::test]
    async fn test_normalize_empty_binary_is_empty_text() {
        let text = normalize(InboundMessage::Binary(Vec::new())).await.unwrap();
        assert_eq!(text, "");
    }

    #[tokio::test]
    async fn test_normalize_deferred_decodes_materialized_bytes() {
        let msg = InboundMessage::deferred(async { Ok(vec![b'o', b'k', 0xFE]) });
        let text = normalize(msg).await.unwrap();
        assert_eq!(text, "ok\u{FFFD}");
    }

    #[tokio::test]
    async fn test_normalize_deferred_failure_is_materialization_error() {
        let msg = InboundMessage::deferred(async {
            Err(io::Error::new(io::ErrorKind::Other, "blob store gone"))
        });
        let err = normalize(msg).await.unwrap_err();
        assert!(matches!(err, RelayError::Materialization(_)));
    }

    #[tokio::test]
    async fn test_normalize_unrecognized_is_error() {
        let err = normalize(InboundMessage::Unrecognized { kind: "raw frame" })
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::UnrecognizedShape("raw frame")));
        assert_eq!(err.to_string(), "unrecognized message shape: raw frame");
    }

    // ── fan_out ──────────────────────────────────────────────────────────────

    #[test]
    fn test_fan_out_reaches_everyone_but_source() {
        // Arrange: A, B, C registered; A is the source
        let a = silent();
        let b = expecting("hello", 1);
        let c = expecting("hello", 1);
        let engine = engine_with(&[&a, &b, &c]);

        // Act
        let report = engine.fan_out(&RelayEvent::new(a.id(), "hello"));

        // Assert
        assert_eq!(
            report,
            FanOutReport {
                delivered: 2,
                skipped: 0,
                failed: 0
            }
        );
    }

    #[test]
    fn test_fan_out_with_single_client_delivers_nothing() {
        let a = silent();
        let engine = engine_with(&[&a]);

        let report = engine.fan_out(&RelayEvent::new(a.id(), "alone"));

        assert_eq!(report.peers(), 0);
    }

    #[test]
    fn test_fan_out_skips_closing_peer() {
        let a = silent();
        let b = silent();
        let c = expecting("ping", 1);
        b.mark_closing();
        let engine = engine_with(&[&a, &b, &c]);

        let report = engine.fan_out(&RelayEvent::new(a.id(), "ping"));

        assert_eq!(report.delivered, 1);
        assert_eq!(report.skipped, 1);
        // A closing peer is skipped, not evicted; its own session removes it.
        assert!(engine.registry().contains(b.id()));
    }

    #[test]
    fn test_fan_out_failure_is_isolated_and_evicted() {
        // Arrange: B's writer is gone, C is healthy
        let a = silent();
        let b = broken();
        let c = expecting("offer", 1);
        let engine = engine_with(&[&a, &b, &c]);

        // Act
        let report = engine.fan_out(&RelayEvent::new(a.id(), "offer"));

        // Assert: C still got it, B is gone from the registry
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert!(!engine.registry().contains(b.id()));
        assert!(engine.registry().contains(c.id()));
    }

    #[test]
    fn test_fan_out_after_disconnect_reaches_remaining_peer_only() {
        // A, B, C connect; B leaves; A sends "ping"
        let a = silent();
        let b = silent();
        let c = expecting("ping", 1);
        let engine = engine_with(&[&a, &b, &c]);
        engine.registry().remove(b.id());

        let report = engine.fan_out(&RelayEvent::new(a.id(), "ping"));

        assert_eq!(report.delivered, 1);
        assert!(!engine.registry().contains(b.id()));
    }

    // ── ingest ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_ingest_binary_broadcasts_decoded_text() {
        let a = silent();
        let b = expecting("candidate", 1);
        let engine = engine_with(&[&a, &b]);

        let outcome = engine
            .ingest(a.id(), InboundMessage::Binary(b"candidate".to_vec()))
            .await;

        assert!(matches!(outcome, RelayOutcome::Broadcast(r) if r.delivered == 1));
    }

    #[tokio::test]
    async fn test_ingest_unrecognized_drops_then_next_message_flows() {
        // Arrange: B must receive "after" exactly once and nothing else
        let a = silent();
        let b = expecting("after", 1);
        let engine = engine_with(&[&a, &b]);

        // Act
        let dropped = engine
            .ingest(a.id(), InboundMessage::Unrecognized { kind: "raw frame" })
            .await;
        let sent = engine
            .ingest(a.id(), InboundMessage::Text("after".to_string()))
            .await;

        // Assert
        assert_eq!(dropped, RelayOutcome::Dropped);
        assert!(matches!(sent, RelayOutcome::Broadcast(_)));
    }

    #[tokio::test]
    async fn test_ingest_failed_materialization_drops() {
        let a = silent();
        let b = silent();
        let engine = engine_with(&[&a, &b]);

        let outcome = engine
            .ingest(
                a.id(),
                InboundMessage::deferred(async {
                    Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
                }),
            )
            .await;

        assert_eq!(outcome, RelayOutcome::Dropped);
    }

    #[test]
    fn test_pending_deferred_does_not_block_other_connection() {
        // Arrange: A's blob is not ready yet; D sends plain text meanwhile
        let a = expecting("from-d", 1);
        let b = expecting("from-d", 1);
        let d = silent();
        let engine = engine_with(&[&a, &b, &d]);

        let (blob_tx, blob_rx) = oneshot::channel::<Vec<u8>>();
        let deferred = InboundMessage::deferred(async move {
            blob_rx
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e))
        });

        let mut from_a = tokio_test::task::spawn(engine.ingest(a.id(), deferred));
        assert_pending!(from_a.poll());

        // Act: D's message goes straight through
        let mut from_d = tokio_test::task::spawn(
            engine.ingest(d.id(), InboundMessage::Text("from-d".to_string())),
        );
        let outcome = assert_ready!(from_d.poll());

        // Assert
        assert!(matches!(outcome, RelayOutcome::Broadcast(r) if r.delivered == 2));

        // A's blob source goes away: materialization fails, nothing is sent.
        drop(blob_tx);
        assert!(from_a.is_woken());
        assert_eq!(assert_ready!(from_a.poll()), RelayOutcome::Dropped);
    }

    #[tokio::test]
    async fn test_resolved_deferred_broadcasts_after_wait() {
        let a = silent();
        let b = expecting("late blob", 1);
        let engine = engine_with(&[&a, &b]);

        let (blob_tx, blob_rx) = oneshot::channel::<Vec<u8>>();
        let deferred = InboundMessage::deferred(async move {
            blob_rx
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e))
        });
        blob_tx.send(b"late blob".to_vec()).unwrap();

        let outcome = engine.ingest(a.id(), deferred).await;

        assert!(matches!(outcome, RelayOutcome::Broadcast(r) if r.delivered == 1));
    }
}
