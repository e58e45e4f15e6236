//! # Pull Session Example
//!
//! Follows one Autobus game over plain HTTP:
//!
//! 1. Build a [`PullAdapter`] with the host credential
//! 2. Start the sync engine and print the lobby
//! 3. Open a game and print every state change and toast
//! 4. Shut down gracefully on Ctrl+C
//!
//! ## Running
//!
//! ```sh
//! AUTOBUS_URL=https://my-host.example \
//! AUTOBUS_INIT_DATA="query_id=..." \
//! AUTOBUS_GAME=7f6c1a7e-0000-0000-0000-000000000000 \
//! cargo run --example pull_session
//! ```

use autobus_sync::{
    LoggingHost, PullAdapter, PullConfig, SyncClient, SyncConfig, SyncEvent, Viewer,
};

/// Default service origin when `AUTOBUS_URL` is not set.
const DEFAULT_URL: &str = "http://localhost:3000";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=debug` to see every request and poll decision.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let url = std::env::var("AUTOBUS_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    let init_data = std::env::var("AUTOBUS_INIT_DATA").unwrap_or_default();
    let game = std::env::var("AUTOBUS_GAME")
        .ok()
        .map(|id| uuid::Uuid::parse_str(&id))
        .transpose()?;
    tracing::info!("Syncing against {url}");

    let adapter = PullAdapter::new(PullConfig::new(url, init_data))?;
    let host = LoggingHost::new(Viewer::new(0, "demo"));
    let (mut client, mut events) = SyncClient::start(adapter, host, SyncConfig::new());

    if let Some(game_id) = game {
        if let Err(e) = client.open_game(game_id).await {
            tracing::warn!("Could not open {game_id}: {e}");
        }
    }

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                match event {
                    SyncEvent::LobbyUpdated(listing) => {
                        tracing::info!(
                            "Lobby: {} of mine, {} open",
                            listing.my_games.len(),
                            listing.open_games.len()
                        );
                    }
                    SyncEvent::StateUpdated { snapshot, optimistic } => {
                        tracing::info!(
                            "State: {:?}, card index {}, bus progress {}{}",
                            snapshot.lifecycle(),
                            snapshot.game.current_card_index,
                            snapshot.game.bus_progress,
                            if optimistic { " (pending)" } else { "" }
                        );
                    }
                    SyncEvent::Toast(toast) => {
                        tracing::info!("[{:?}] {}", toast.kind, toast.text);
                    }
                    SyncEvent::FetchFailed { message } => {
                        tracing::warn!("{message}");
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
