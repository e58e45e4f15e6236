//! Events and render state published by the sync engine.

use std::sync::Arc;

use crate::adapter::{ConnectionState, TransportKind};
use crate::notify::Toast;
use crate::protocol::{ActionKind, ActionReply, GameId, LobbyListing, Snapshot, Timestamp};

/// Which screen the engine is synchronizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Screen {
    #[default]
    Lobby,
    Game(GameId),
}

/// Events emitted by [`SyncClient`](crate::SyncClient).
///
/// Events are delivered on a bounded channel. When the consumer falls behind
/// events are dropped with a warning; [`Stopped`](SyncEvent::Stopped) is
/// always delivered and is always the last event.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Synthetic first event.
    Started { transport: TransportKind },
    /// The transport's connection state changed.
    Connection(ConnectionState),
    /// The push transport gave up reconnecting. No further snapshots will arrive.
    ReconnectExhausted { attempts: u32 },
    /// The engine switched screens.
    ScreenChanged(Screen),
    /// A new lobby listing was fetched.
    LobbyUpdated(Arc<LobbyListing>),
    /// The visible game state changed.
    StateUpdated {
        snapshot: Arc<Snapshot>,
        /// `true` while the state includes an unconfirmed local action.
        optimistic: bool,
    },
    /// A notification should be shown.
    Toast(Toast),
    /// The toast with `key` expired or was replaced.
    ToastCleared { key: Timestamp },
    /// An action succeeded. `summary` is a short local description built
    /// from the reply, if the reply allows one.
    ActionCompleted {
        kind: ActionKind,
        summary: Option<String>,
        reply: ActionReply,
    },
    /// An action failed. `message` is what the host was asked to show.
    ActionFailed { kind: ActionKind, message: String },
    /// A background read failed. State is left untouched.
    FetchFailed { message: String },
    /// The engine stopped.
    Stopped,
}

/// Everything a UI needs to render, published on every change.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ViewState {
    pub screen: Screen,
    /// Visible game state: the overlay while an action is pending, else the
    /// last confirmed snapshot.
    pub snapshot: Option<Arc<Snapshot>>,
    pub optimistic: bool,
    pub lobby: Option<Arc<LobbyListing>>,
    pub toast: Option<Toast>,
    /// `true` while an action awaits its result.
    pub acting: bool,
    pub connection: Option<ConnectionState>,
}

impl ViewState {
    /// Game currently on screen.
    pub fn active_game(&self) -> Option<GameId> {
        match self.screen {
            Screen::Game(game_id) => Some(game_id),
            Screen::Lobby => None,
        }
    }
}
