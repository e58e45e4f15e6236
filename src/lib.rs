//! # Autobus Sync
//!
//! Client-side state synchronization core for the Autobus pyramid/bus card
//! game.
//!
//! The game service owns the authoritative state. This crate keeps a local
//! mirror of it responsive and correct over either of two transports:
//!
//! - **Pull**: stateless HTTP requests plus adaptive polling ([`PullAdapter`]).
//! - **Push**: a persistent connection that pushes snapshots and carries
//!   correlated calls ([`PushAdapter`] over any [`Transport`]).
//!
//! ## Features
//!
//! - **Optimistic actions**: the viewer's own actions show up immediately and
//!   are replaced wholesale by the next authoritative snapshot
//! - **Stale-safe**: snapshots older than the applied one are ignored
//! - **Quiet polling**: no polling while it is the viewer's move
//! - **One toast per update**: the action log is turned into non-repeating
//!   notifications through a high-water mark
//! - **Event-driven**: typed [`SyncEvent`]s on a channel, render state on a
//!   `watch` channel
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use autobus_sync::{LoggingHost, PullAdapter, PullConfig, SyncClient, SyncConfig, Viewer};
//!
//! let adapter = PullAdapter::new(PullConfig::new("https://example.invalid", init_data))?;
//! let host = LoggingHost::new(Viewer::new(42, "Ana"));
//! let (client, mut events) = SyncClient::start(adapter, host, SyncConfig::new());
//! client.open_game(game_id).await?;
//! ```

pub mod adapter;
pub mod engine;
pub mod error;
pub mod event;
pub mod host;
pub mod notify;
pub mod optimistic;
pub mod protocol;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
#[cfg(feature = "transport-http")]
pub use adapter::{PullAdapter, PullConfig};
pub use adapter::{
    ConnectionState, LobbyNotice, PushAdapter, PushConfig, PushEvent, SyncTransport,
    TransportKind,
};
pub use engine::{SyncClient, SyncConfig};
pub use error::{Result, SyncError};
pub use event::{Screen, SyncEvent, ViewState};
pub use host::{Host, LoggingHost, Viewer};
pub use notify::{Toast, ToastKind, MAX_TOAST_LIFETIME};
pub use protocol::{
    ActionKind, ActionReply, Card, GameAction, GameId, GuessDirection, LobbyListing, PlayerId,
    Snapshot,
};
pub use scheduler::{PollDecision, PollIntervals};
pub use transport::{Connector, Transport};

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
