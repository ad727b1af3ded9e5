//! signal-relay — entry point.
//!
//! Accepts WebSocket connections and rebroadcasts every message a client sends
//! to all other connected clients. Browsers use it to exchange signaling
//! messages (session descriptions, ICE candidates) before they open a direct
//! peer-to-peer media session.
//!
//! # Usage
//!
//! ```text
//! signal-relay [OPTIONS]
//!
//! Options:
//!   --port <PORT>   Port to listen on (all interfaces) [env: RELAY_PORT] [default: 3000]
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use signal_relay::domain::config::{RelayConfig, DEFAULT_PORT};
use signal_relay::infrastructure::run_server;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// WebSocket signaling relay.
///
/// Every text or binary message received from one client is forwarded as text
/// to every other connected client.
#[derive(Debug, Parser)]
#[command(
    name = "signal-relay",
    about = "WebSocket broadcast relay for peer-to-peer signaling",
    version
)]
struct Cli {
    /// TCP port to listen on. Clients connect to ws://host:PORT/.
    #[arg(long, default_value_t = DEFAULT_PORT, env = "RELAY_PORT")]
    port: u16,
}

impl Cli {
    /// Converts the parsed CLI arguments into a [`RelayConfig`].
    fn into_relay_config(self) -> RelayConfig {
        RelayConfig::with_port(self.port)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// Startup failures (most commonly the port already being in use) bubble out
/// of `main` as an `anyhow::Error`, which prints the context chain and exits
/// with a non-zero status.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_relay_config();

    info!("signal relay starting on {}", config.bind_addr);

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    // The accept loop polls `running` every 200 ms and closes all
    // connections once it is cleared.
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C — initiating graceful shutdown");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    run_server(config, running).await?;

    info!("signal relay stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
