//! WebSocket server: accept loop and per-connection session management.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Accepting incoming TCP connections.
//! 3. Upgrading each connection to a WebSocket session (root path only).
//! 4. Registering the session with the [`ConnectionRegistry`] and spawning its
//!    writer task.
//! 5. Reading frames in order and handing each one to the [`RelayEngine`].
//! 6. Unregistering the session when it closes or fails.
//! 7. Closing every connection when the `running` flag is cleared.
//!
//! # Scalability
//!
//! Each session runs in its own Tokio task, so a connection that is waiting
//! on a slow payload or a slow peer never delays any other connection. The
//! accept loop only accepts and spawns.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use futures_util::{Stream, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        http::StatusCode,
        Error as WsError, Message as WsMessage,
    },
};
use tracing::{debug, error, info, warn};

use crate::application::{Connection, ConnectionRegistry, RelayEngine};
use crate::domain::{InboundMessage, RelayConfig};
use crate::infrastructure::outbound::{write_outbound, ChannelOutbound};

/// How often the accept loop wakes up to check the `running` flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// How long a closing connection's writer may take to flush its Close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Pause after a failed `accept()` so a persistent error (e.g. EMFILE) does not
/// spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

// ── Public API ────────────────────────────────────────────────────────────────

/// A bound relay listener, ready to serve.
///
/// Binding and serving are separate steps so callers (and tests) can learn the
/// actual port and grab the registry before the accept loop starts.
pub struct RelayServer {
    listener: TcpListener,
    config: Arc<RelayConfig>,
    engine: RelayEngine,
}

impl RelayServer {
    /// Binds the listener with a fresh, empty registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP listener cannot be bound (e.g., the port is
    /// already in use or the process lacks permission to bind).
    pub async fn bind(config: RelayConfig) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .with_context(|| format!("failed to bind relay listener on {}", config.bind_addr))?;

        let registry = Arc::new(ConnectionRegistry::new());

        Ok(Self {
            listener,
            config: Arc::new(config),
            engine: RelayEngine::new(registry),
        })
    }

    /// The address actually bound (useful when binding port 0).
    ///
    /// # Errors
    ///
    /// Returns an error if the OS cannot report the socket address.
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("failed to read relay listener address")
    }

    /// The registry this server publishes connections to.
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(self.engine.registry())
    }

    /// Runs the accept loop until `running` is set to `false`, then closes
    /// every open connection.
    ///
    /// # Errors
    ///
    /// Currently infallible once bound; accept errors are logged and the loop
    /// keeps going.
    pub async fn serve(self, running: Arc<AtomicBool>) -> anyhow::Result<()> {
        match self.listener.local_addr() {
            Ok(addr) => info!("relay listening on ws://{addr}{}", self.config.path),
            Err(e) => warn!("relay listening (address unavailable: {e})"),
        }

        let mut sessions = JoinSet::new();

        loop {
            if !running.load(Ordering::Relaxed) {
                info!("shutdown flag set; stopping accept loop");
                break;
            }

            // Reap finished sessions so the set does not grow without bound.
            while let Some(result) = sessions.try_join_next() {
                log_join_error(result);
            }

            // A short timeout on `accept()` lets the loop notice the shutdown
            // flag even when nobody is connecting.
            match timeout(ACCEPT_POLL_INTERVAL, self.listener.accept()).await {
                Ok(Ok((stream, peer_addr))) => {
                    debug!("tcp connection from {peer_addr}");
                    let config = Arc::clone(&self.config);
                    let engine = self.engine.clone();
                    sessions.spawn(handle_session(stream, peer_addr, config, engine));
                }
                Ok(Err(e)) => pause_after_accept_error(&e).await,
                Err(_) => {}
            }
        }

        let closed = self.engine.registry().close_all();
        info!("closing {closed} open connection(s)");

        let drained = timeout(CLOSE_GRACE, async {
            while let Some(result) = sessions.join_next().await {
                log_join_error(result);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "{} session(s) still running after {CLOSE_GRACE:?}; aborting",
                sessions.len()
            );
            sessions.abort_all();
        }

        Ok(())
    }
}

/// Binds `config.bind_addr` and serves until `running` is set to `false`.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound.
pub async fn run_server(config: RelayConfig, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    RelayServer::bind(config).await?.serve(running).await
}

// ── Per-session handler ───────────────────────────────────────────────────────

/// Wraps [`run_session`] and logs the outcome.
async fn handle_session(
    raw_stream: TcpStream,
    peer_addr: SocketAddr,
    config: Arc<RelayConfig>,
    engine: RelayEngine,
) {
    match run_session(raw_stream, peer_addr, config, engine).await {
        Ok(()) => debug!("session {peer_addr} finished"),
        Err(e) => warn!("session {peer_addr} closed with error: {e:#}"),
    }
}

/// Runs the complete lifecycle of a single relay connection.
///
/// 1. Completes the WebSocket handshake (rejecting any path but the relay's).
/// 2. Spawns the writer task and registers an `Open` [`Connection`]. If the
///    registry has already been shut down, the connection is closed at once.
/// 3. Reads frames and relays them until the peer closes, a transport error
///    occurs, or the writer stops.
/// 4. Unregisters the connection and lets the writer flush a Close frame.
///
/// # Errors
///
/// Returns an error only if the handshake fails. Everything after that is a
/// normal lifecycle event.
async fn run_session(
    raw_stream: TcpStream,
    peer_addr: SocketAddr,
    config: Arc<RelayConfig>,
    engine: RelayEngine,
) -> anyhow::Result<()> {
    let expected_path = config.path.clone();
    let ws_stream = accept_hdr_async(
        raw_stream,
        move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            check_path(&expected_path, request)?;
            Ok(response)
        },
    )
    .await
    .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;

    let (ws_tx, mut ws_rx) = ws_stream.split();
    let (outbound, outbound_rx) = ChannelOutbound::channel(config.outbound_capacity);
    let connection = Arc::new(Connection::new(peer_addr, Box::new(outbound)));
    let id = connection.id();
    let registry = Arc::clone(engine.registry());

    let mut writer = tokio::spawn(write_outbound(ws_tx, outbound_rx, id));

    if !registry.add(Arc::clone(&connection)) {
        info!("connection {id} from {peer_addr} refused: relay is shutting down");
        finish_writer(&connection, &mut writer).await;
        connection.mark_closed();
        return Ok(());
    }
    info!(
        "connection {id} opened from {peer_addr} ({} connected)",
        registry.len()
    );

    // The session ends as soon as either side is done:
    // - the reader stops (peer closed, transport error, or relay shutdown)
    // - the writer stops (write error or relay-initiated close)
    let writer_finished = tokio::select! {
        () = read_inbound(&mut ws_rx, &connection, &engine) => false,
        result = &mut writer => {
            log_writer_result(&connection, result);
            true
        }
    };

    registry.remove(id);

    if !writer_finished {
        finish_writer(&connection, &mut writer).await;
    }

    connection.mark_closed();
    info!(
        "connection {id} from {peer_addr} disconnected ({} connected)",
        registry.len()
    );
    Ok(())
}

/// Closes `connection` and gives its writer [`CLOSE_GRACE`] to flush the
/// Close frame before aborting it.
async fn finish_writer(
    connection: &Connection,
    writer: &mut JoinHandle<Result<(), WsError>>,
) {
    connection.close();
    match timeout(CLOSE_GRACE, &mut *writer).await {
        Ok(result) => log_writer_result(connection, result),
        Err(_) => {
            debug!(
                "connection {}: writer did not finish within {CLOSE_GRACE:?}",
                connection.id()
            );
            writer.abort();
        }
    }
}

/// Logs a failed `accept()` and backs off briefly before the next attempt.
async fn pause_after_accept_error(e: &std::io::Error) {
    error!("accept error: {e}");
    sleep(ACCEPT_ERROR_BACKOFF).await;
}

/// Reads frames from one connection and relays each in turn.
///
/// Each message is fully relayed before the next frame is read, so a
/// connection's own messages are never reordered. Returns when the peer
/// closes, the stream fails, or the connection leaves the `Open` state.
async fn read_inbound<S>(ws_rx: &mut S, connection: &Connection, engine: &RelayEngine)
where
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    let id = connection.id();

    while connection.state().is_open() {
        let ws_msg = match ws_rx.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(WsError::ConnectionClosed | WsError::Protocol(_))) => {
                debug!("connection {id}: WebSocket closed");
                break;
            }
            Some(Err(e)) => {
                warn!("connection {id}: WebSocket read error: {e}");
                break;
            }
            None => {
                debug!("connection {id}: stream ended");
                break;
            }
        };

        // The connection may have left `Open` while we were waiting.
        if !connection.state().is_open() {
            debug!("connection {id}: no longer open, ignoring further frames");
            break;
        }

        let inbound = match ws_msg {
            WsMessage::Text(text) => InboundMessage::Text(text),
            WsMessage::Binary(bytes) => InboundMessage::Binary(bytes),
            WsMessage::Ping(data) => {
                // tungstenite queues the Pong reply itself.
                debug!("connection {id}: ping ({} bytes)", data.len());
                continue;
            }
            WsMessage::Pong(_) => {
                debug!("connection {id}: pong");
                continue;
            }
            WsMessage::Close(frame) => {
                debug!("connection {id}: Close frame received: {frame:?}");
                connection.mark_closing();
                break;
            }
            WsMessage::Frame(_) => InboundMessage::Unrecognized { kind: "raw frame" },
        };

        engine.ingest(id, inbound).await;
    }
}

/// Rejects upgrade requests for any path other than `expected` with a 404.
fn check_path(expected: &str, request: &Request) -> Result<(), ErrorResponse> {
    let path = request.uri().path();
    if path == expected {
        return Ok(());
    }

    warn!("rejecting WebSocket upgrade for path {path}");
    let mut response = ErrorResponse::new(Some(format!("no relay at {path}")));
    *response.status_mut() = StatusCode::NOT_FOUND;
    Err(response)
}

fn log_writer_result(connection: &Connection, result: Result<Result<(), WsError>, JoinError>) {
    let id = connection.id();
    match result {
        Ok(Ok(())) => debug!("connection {id}: writer finished"),
        // Write errors are how a vanished peer usually shows up.
        Ok(Err(e)) => {
            connection.mark_closed();
            debug!("connection {id}: write failed: {e}");
        }
        Err(e) => error!("connection {id}: writer task failed: {e}"),
    }
}

fn log_join_error(result: Result<(), JoinError>) {
    if let Err(e) = result {
        if !e.is_cancelled() {
            error!("session task failed: {e}");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
