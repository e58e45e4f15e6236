#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for Autobus Sync integration tests.
//!
//! Provides a scripted [`ScriptedTransport`], a [`RecordingHost`] and
//! snapshot fixtures.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use autobus_sync::protocol::{LogEntry, Timestamp};
use autobus_sync::{
    ActionReply, Card, ConnectionState, GameAction, GameId, Host, LobbyListing, PushEvent,
    Snapshot, SyncEvent, SyncError, SyncTransport, TransportKind, Viewer,
};
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

pub const GAME: Uuid = Uuid::from_u128(0xA0B0_5000);
pub const VIEWER_ID: i64 = 42;

// ── ScriptedTransport ───────────────────────────────────────────────

/// One call the engine made on the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    FetchSnapshot(GameId),
    FetchLobby,
    Action(GameAction),
}

/// Scripted responses and a record of every call.
///
/// When the snapshot queue is empty, `fetch_snapshot` serves the last
/// snapshot again, which is what a poll sees when nothing changed.
#[derive(Default)]
pub struct Script {
    snapshots: StdMutex<VecDeque<Result<Snapshot, SyncError>>>,
    current: StdMutex<Option<Snapshot>>,
    lobby: StdMutex<LobbyListing>,
    replies: StdMutex<VecDeque<Result<ActionReply, SyncError>>>,
    calls: StdMutex<Vec<Call>>,
    not_ready: AtomicBool,
    hold_actions: AtomicBool,
    release: Notify,
}

impl Script {
    pub fn queue_snapshot(&self, snapshot: Snapshot) {
        self.snapshots.lock().unwrap().push_back(Ok(snapshot));
    }

    pub fn fail_next_fetch(&self, error: SyncError) {
        self.snapshots.lock().unwrap().push_back(Err(error));
    }

    pub fn set_lobby(&self, lobby: LobbyListing) {
        *self.lobby.lock().unwrap() = lobby;
    }

    pub fn queue_reply(&self, reply: Result<ActionReply, SyncError>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn set_ready(&self, ready: bool) {
        self.not_ready.store(!ready, Ordering::SeqCst);
    }

    /// Park every `send_action` until [`release_action`](Self::release_action).
    pub fn hold_actions(&self) {
        self.hold_actions.store(true, Ordering::SeqCst);
    }

    pub fn release_action(&self) {
        self.release.notify_one();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn snapshot_fetches(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::FetchSnapshot(_)))
            .count()
    }

    pub fn lobby_fetches(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::FetchLobby))
            .count()
    }

    pub fn actions(&self) -> Vec<GameAction> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Action(action) => Some(action),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

/// A [`SyncTransport`] that replays a [`Script`].
pub struct ScriptedTransport {
    kind: TransportKind,
    script: Arc<Script>,
    push_rx: Option<mpsc::Receiver<PushEvent>>,
}

impl ScriptedTransport {
    pub fn pull() -> (Self, Arc<Script>) {
        let script = Arc::new(Script::default());
        let transport = Self {
            kind: TransportKind::Pull,
            script: Arc::clone(&script),
            push_rx: None,
        };
        (transport, script)
    }

    pub fn push() -> (Self, Arc<Script>, mpsc::Sender<PushEvent>) {
        let script = Arc::new(Script::default());
        let (push_tx, push_rx) = mpsc::channel(64);
        let transport = Self {
            kind: TransportKind::Push,
            script: Arc::clone(&script),
            push_rx: Some(push_rx),
        };
        (transport, script, push_tx)
    }
}

#[async_trait]
impl SyncTransport for ScriptedTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn connection_state(&self) -> ConnectionState {
        if self.script.not_ready.load(Ordering::SeqCst) {
            ConnectionState::Disconnected
        } else {
            ConnectionState::Ready
        }
    }

    async fn fetch_snapshot(&self, game_id: GameId) -> Result<Snapshot, SyncError> {
        self.script.record(Call::FetchSnapshot(game_id));
        let next = self.script.snapshots.lock().unwrap().pop_front();
        match next {
            Some(Ok(snapshot)) => {
                *self.script.current.lock().unwrap() = Some(snapshot.clone());
                Ok(snapshot)
            }
            Some(Err(error)) => Err(error),
            None => self
                .script
                .current
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| SyncError::Http("no snapshot scripted".into())),
        }
    }

    async fn fetch_lobby(&self) -> Result<LobbyListing, SyncError> {
        self.script.record(Call::FetchLobby);
        Ok(self.script.lobby.lock().unwrap().clone())
    }

    async fn send_action(&self, action: &GameAction) -> Result<ActionReply, SyncError> {
        self.script.record(Call::Action(action.clone()));
        if self.script.hold_actions.load(Ordering::SeqCst) {
            self.script.release.notified().await;
        }
        let next = self.script.replies.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Ok(ActionReply {
                ok: true,
                ..Default::default()
            })
        })
    }

    fn take_push_events(&mut self) -> Option<mpsc::Receiver<PushEvent>> {
        self.push_rx.take()
    }
}

// ── RecordingHost ───────────────────────────────────────────────────

/// A [`Host`] that records every alert.
#[derive(Clone, Default)]
pub struct RecordingHost {
    pub alerts: Arc<StdMutex<Vec<String>>>,
}

impl RecordingHost {
    pub fn alerts(&self) -> Vec<String> {
        self.alerts.lock().unwrap().clone()
    }
}

impl Host for RecordingHost {
    fn viewer(&self) -> Viewer {
        Viewer::new(VIEWER_ID, "Ana")
    }

    fn alert(&self, message: &str) {
        self.alerts.lock().unwrap().push(message.to_string());
    }
}

// ── Fixtures ────────────────────────────────────────────────────────

pub fn entry(action_type: &str, flavor_text: &str, created_at: Timestamp) -> LogEntry {
    LogEntry {
        action_type: action_type.to_string(),
        flavor_text: Some(flavor_text.to_string()),
        created_at,
    }
}

/// Active pyramid game waiting for the next flip. Cell 0 is face up, the
/// viewer holds 3♥️ and 9♠️ and does not have the move.
pub fn pyramid_snapshot(log: Vec<LogEntry>) -> Snapshot {
    let json = serde_json::json!({
        "game": {
            "id": GAME,
            "status": "active",
            "current_phase": "pyramid",
            "current_card_index": 0,
            "matching_done": true,
            "match_turn_index": 0,
            "created_by": VIEWER_ID
        },
        "players": [
            { "user_id": VIEWER_ID, "first_name": "Ana", "hand_count": 2 },
            { "user_id": 7, "username": "marko", "hand_count": 4 }
        ],
        "pyramid": [
            { "index": 0, "row": 5, "rank": "3", "suit": "♣️", "flipped": true },
            { "index": 1, "row": 5, "flipped": false },
            { "index": 2, "row": 5, "flipped": false }
        ],
        "my_hand": [ { "rank": "3", "suit": "♥️" }, { "rank": "9", "suit": "♠️" } ],
        "current_flipped_card": { "rank": "3", "suit": "♣️", "index": 0, "drinkValue": 1 },
        "needs_flip": true,
        "my_id": VIEWER_ID
    });
    let mut snapshot: Snapshot = serde_json::from_value(json).unwrap();
    snapshot.recent_log = log;
    snapshot
}

/// Same game, but it is the viewer's match turn and 3♥️ matches.
pub fn my_match_turn(log: Vec<LogEntry>) -> Snapshot {
    let mut snapshot = pyramid_snapshot(log);
    snapshot.needs_flip = false;
    snapshot.game.matching_done = false;
    snapshot.is_my_match_turn = true;
    snapshot.can_match = true;
    snapshot.matchable_cards = vec![Card::new("3", "♥️")];
    snapshot
}

/// Bus phase with another player riding.
pub fn bus_snapshot(log: Vec<LogEntry>) -> Snapshot {
    let mut snapshot = pyramid_snapshot(log);
    snapshot.game.current_phase = Some(autobus_sync::protocol::GamePhase::Bus);
    snapshot.game.bus_player_id = Some(7);
    snapshot.game.bus_current_card = Some(Card::new("8", "♦️"));
    snapshot.needs_flip = false;
    snapshot
}

// ── Event helpers ───────────────────────────────────────────────────

/// Receive events until `pred` matches, returning the match and everything before it.
pub async fn wait_for(
    events: &mut mpsc::Receiver<SyncEvent>,
    pred: impl Fn(&SyncEvent) -> bool,
) -> (SyncEvent, Vec<SyncEvent>) {
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(60), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event stream ended");
        if pred(&event) {
            return (event, seen);
        }
        seen.push(event);
    }
}

/// Everything already queued on the event channel.
pub fn drain(events: &mut mpsc::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}
