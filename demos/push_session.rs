//! # Push Session Example
//!
//! Follows one Autobus game over a WebSocket push channel. The
//! [`PushAdapter`] dials, identifies and reconnects on its own; the engine
//! applies every snapshot the service pushes and never polls.
//!
//! ## Running
//!
//! ```sh
//! AUTOBUS_WS_URL=ws://localhost:3000/ws \
//! AUTOBUS_GAME=7f6c1a7e-0000-0000-0000-000000000000 \
//! cargo run --example push_session
//! ```

use std::time::Duration;

use autobus_sync::{
    ConnectionState, LoggingHost, PushAdapter, PushConfig, SyncClient, SyncConfig, SyncEvent,
    Viewer, WebSocketConnector,
};

/// Default channel URL when `AUTOBUS_WS_URL` is not set.
const DEFAULT_URL: &str = "ws://localhost:3000/ws";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let url = std::env::var("AUTOBUS_WS_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    let game = std::env::var("AUTOBUS_GAME")
        .ok()
        .map(|id| uuid::Uuid::parse_str(&id))
        .transpose()?;
    tracing::info!("Connecting to {url}");

    let host = LoggingHost::new(Viewer::new(42, "Ana"));
    let connector = WebSocketConnector::new(url).with_connect_timeout(Duration::from_secs(5));
    let adapter = PushAdapter::start(
        connector,
        &host,
        PushConfig::new().with_max_reconnect_attempts(3),
    );
    let (mut client, mut events) = SyncClient::start(adapter, host, SyncConfig::new());

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                match event {
                    SyncEvent::Connection(ConnectionState::Ready) => {
                        tracing::info!("Channel ready");
                        if let Some(game_id) = game {
                            // Ready again after a reconnect: the engine already resyncs.
                            let view = client.view();
                            if view.active_game() != Some(game_id) {
                                tracing::info!("Opening {game_id}");
                                if let Err(e) = client.open_game(game_id).await {
                                    tracing::warn!("Could not open {game_id}: {e}");
                                }
                            }
                        }
                    }
                    SyncEvent::Connection(state) => {
                        tracing::info!("Connection: {state:?}");
                    }
                    SyncEvent::ReconnectExhausted { attempts } => {
                        tracing::error!("Gave up after {attempts} reconnect attempts");
                        client.shutdown().await;
                    }
                    SyncEvent::StateUpdated { snapshot, optimistic } => {
                        tracing::info!(
                            "State: {:?}, {} card(s) in hand{}",
                            snapshot.lifecycle(),
                            snapshot.my_hand.len(),
                            if optimistic { " (pending)" } else { "" }
                        );
                    }
                    SyncEvent::Toast(toast) => {
                        tracing::info!("[{:?}] {}", toast.kind, toast.text);
                    }
                    SyncEvent::Stopped => break,
                    _ => {}
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down");
                client.shutdown().await;
            }
        }
    }

    Ok(())
}
