//! Transport adapters: one interface over pull (HTTP) and push (socket) backends.
//!
//! The engine talks to the game service only through [`SyncTransport`]. Both
//! variants expose the same three operations (fetch a snapshot, fetch the
//! lobby, send an action) and report readiness. The push variant
//! additionally hands out a stream of [`PushEvent`]s once, at start-up.
//!
//! | Variant | Type | Feature |
//! |---------|------|---------|
//! | Pull | [`PullAdapter`] | `transport-http` |
//! | Push | [`PushAdapter`] | always (bring a [`Connector`](crate::Connector)) |

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::protocol::{ActionReply, GameAction, GameId, LobbyListing, PlayerId, Snapshot};

#[cfg(feature = "transport-http")]
pub mod pull;
pub mod push;

#[cfg(feature = "transport-http")]
pub use pull::{PullAdapter, PullConfig};
pub use push::{PushAdapter, PushConfig};

/// Which delivery model a transport uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Stateless request/response. The client polls for changes.
    Pull,
    /// Persistent connection. The service pushes snapshots.
    Push,
}

/// Connection lifecycle of a transport.
///
/// Pull transports are always [`Ready`](ConnectionState::Ready). Push
/// transports walk `Disconnected → Connecting → Connected → Identified →
/// Ready` and fall back to `Reconnecting` when the connection drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Socket open, handshake not sent yet.
    Connected,
    /// Handshake sent, waiting for the server to acknowledge it.
    Identified,
    /// Handshake acknowledged. Calls may be issued.
    Ready,
    /// Waiting before reconnect attempt `attempt` (1-based).
    Reconnecting { attempt: u32 },
    /// The reconnect budget is spent. Terminal.
    Exhausted { attempts: u32 },
}

impl ConnectionState {
    /// Returns `true` if the transport can carry calls right now.
    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }
}

/// Lobby-level notification pushed by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyNotice {
    PlayerJoined { game_id: GameId, player_id: PlayerId },
    PlayerLeft { game_id: GameId, player_id: PlayerId },
    GameEnded { game_id: GameId },
}

/// Unsolicited event delivered by a push transport.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// Authoritative snapshot of a game the viewer takes part in.
    Snapshot(Box<Snapshot>),
    /// Lobby membership changed somewhere.
    Lobby(LobbyNotice),
    /// The connection state changed.
    Connection(ConnectionState),
    /// The service reported an error not tied to any call.
    ServerError(String),
}

/// Uniform interface over the game service.
///
/// # Contract
///
/// - Every failure surfaces as an `Err`, never as an unfulfilled future.
/// - [`send_action`](SyncTransport::send_action) fails fast with
///   [`SyncError::NotConnected`](crate::SyncError::NotConnected) when the
///   transport is not ready. No request is sent in that case.
/// - A rejection by the service surfaces as
///   [`SyncError::ActionRejected`](crate::SyncError::ActionRejected) carrying
///   the service's message.
#[async_trait]
pub trait SyncTransport: Send + Sync + 'static {
    /// Delivery model of this transport.
    fn kind(&self) -> TransportKind;

    /// Current connection state.
    fn connection_state(&self) -> ConnectionState;

    /// Returns `true` if actions can be sent right now.
    fn is_ready(&self) -> bool {
        self.connection_state().is_ready()
    }

    /// Read the current snapshot of `game_id`.
    async fn fetch_snapshot(&self, game_id: GameId) -> Result<Snapshot>;

    /// Read the lobby listing.
    async fn fetch_lobby(&self) -> Result<LobbyListing>;

    /// Perform a state-changing action and return its reply.
    async fn send_action(&self, action: &GameAction) -> Result<ActionReply>;

    /// Take the push event stream. Returns `None` for pull transports and on
    /// every call after the first.
    fn take_push_events(&mut self) -> Option<mpsc::Receiver<PushEvent>> {
        None
    }

    /// Release the transport's resources.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl SyncTransport for Box<dyn SyncTransport> {
    fn kind(&self) -> TransportKind {
        (**self).kind()
    }

    fn connection_state(&self) -> ConnectionState {
        (**self).connection_state()
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }

    async fn fetch_snapshot(&self, game_id: GameId) -> Result<Snapshot> {
        (**self).fetch_snapshot(game_id).await
    }

    async fn fetch_lobby(&self) -> Result<LobbyListing> {
        (**self).fetch_lobby().await
    }

    async fn send_action(&self, action: &GameAction) -> Result<ActionReply> {
        (**self).send_action(action).await
    }

    fn take_push_events(&mut self) -> Option<mpsc::Receiver<PushEvent>> {
        (**self).take_push_events()
    }

    async fn close(&mut self) -> Result<()> {
        (**self).close().await
    }
}
