//! Wire types for the Autobus game service.
//!
//! The same snapshot, lobby and action-reply shapes are served by the HTTP
//! endpoint and carried inside push-channel messages. Every field the service
//! may omit carries `#[serde(default)]` so older servers still decode.
//!
//! Viewer-relative flags (`is_my_match_turn`, `can_match`, `matchable_cards`,
//! `is_bus_player`) are computed by the service for the requesting viewer.
//! They are opaque to this crate and are never recomputed from board state.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Type aliases ────────────────────────────────────────────────────

/// Unique identifier for games.
pub type GameId = Uuid;

/// Unique identifier for players (the host platform's numeric user id).
pub type PlayerId = i64;

/// Log timestamp in milliseconds. Strictly increasing within one game.
pub type Timestamp = i64;

/// Display name used when a player has neither a first name nor a username.
pub const FALLBACK_PLAYER_NAME: &str = "Klovn";

/// Number of pyramid rows. Row 1 is the top row.
pub const PYRAMID_ROWS: u8 = 5;

/// Number of successful guesses that complete a bus ride.
pub const BUS_LENGTH: u32 = 5;

// ── Cards ───────────────────────────────────────────────────────────

/// Presentation-only colour class of a suit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuitColor {
    Red,
    Black,
    /// Suit string the client does not recognise.
    Unknown,
}

/// A playing card. Rank and suit are opaque strings chosen by the service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Card {
    pub rank: String,
    pub suit: String,
}

impl Card {
    /// Create a card from rank and suit.
    pub fn new(rank: impl Into<String>, suit: impl Into<String>) -> Self {
        Self {
            rank: rank.into(),
            suit: suit.into(),
        }
    }

    /// Returns the colour class of this card's suit.
    ///
    /// Accepts the emoji suits with or without the trailing variation selector.
    pub fn color(&self) -> SuitColor {
        match self.suit.trim_end_matches('\u{FE0F}') {
            "♥" | "♦" => SuitColor::Red,
            "♠" | "♣" => SuitColor::Black,
            _ => SuitColor::Unknown,
        }
    }
}

impl std::fmt::Display for Card {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.rank, self.suit)
    }
}

// ── Enums ───────────────────────────────────────────────────────────

/// Server-side game status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    #[default]
    Lobby,
    Active,
    Finished,
}

/// Phase of an active game.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GamePhase {
    #[default]
    Pyramid,
    Bus,
}

/// Combined lifecycle of a game as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Lobby,
    Pyramid,
    Bus,
    Finished,
}

impl Lifecycle {
    /// Returns `true` while the game is being played.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pyramid | Self::Bus)
    }
}

/// Direction of a bus guess relative to the visible bus card.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GuessDirection {
    Higher,
    Lower,
}

// ── Snapshot ────────────────────────────────────────────────────────

/// Game-wide fields of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameInfo {
    pub id: GameId,
    pub status: GameStatus,
    #[serde(default)]
    pub current_phase: Option<GamePhase>,
    /// Index of the most recently flipped pyramid cell, `-1` before the first flip.
    #[serde(default = "default_card_index")]
    pub current_card_index: i32,
    #[serde(default)]
    pub matching_done: bool,
    #[serde(default)]
    pub match_turn_index: u32,
    #[serde(default)]
    pub bus_player_id: Option<PlayerId>,
    #[serde(default)]
    pub bus_current_card: Option<Card>,
    #[serde(default)]
    pub bus_progress: u32,
    #[serde(default)]
    pub created_by: Option<PlayerId>,
}

fn default_card_index() -> i32 {
    -1
}

/// One cell of the pyramid. Rank and suit are present once the cell is flipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PyramidCell {
    pub index: u32,
    pub row: u8,
    #[serde(default)]
    pub rank: Option<String>,
    #[serde(default)]
    pub suit: Option<String>,
    #[serde(default)]
    pub flipped: bool,
}

impl PyramidCell {
    /// Returns the face of this cell, if it has been revealed.
    pub fn card(&self) -> Option<Card> {
        match (&self.rank, &self.suit) {
            (Some(rank), Some(suit)) if self.flipped => Some(Card::new(rank, suit)),
            _ => None,
        }
    }
}

/// Number of drinks a match against a card in `row` hands out.
///
/// Row 1 (the top) is worth the most. Returns `None` outside `1..=5`.
pub fn row_drink_value(row: u8) -> Option<u32> {
    (1..=PYRAMID_ROWS)
        .contains(&row)
        .then(|| u32::from(PYRAMID_ROWS + 1 - row))
}

/// The most recently revealed pyramid card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlippedCard {
    pub rank: String,
    pub suit: String,
    pub index: i32,
    #[serde(rename = "drinkValue", alias = "drink_value", default)]
    pub drink_value: u32,
}

impl FlippedCard {
    /// Returns the face of the revealed card.
    pub fn card(&self) -> Card {
        Card::new(&self.rank, &self.suit)
    }
}

/// Public per-player information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSummary {
    pub user_id: PlayerId,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub hand_count: u32,
    #[serde(default)]
    pub drinks_received: u32,
    #[serde(default)]
    pub is_match_turn: bool,
}

impl PlayerSummary {
    /// Name to show for this player.
    pub fn display_name(&self) -> &str {
        self.first_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .or_else(|| self.username.as_deref().filter(|name| !name.is_empty()))
            .unwrap_or(FALLBACK_PLAYER_NAME)
    }
}

/// One entry of the append-only action log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Category tag, e.g. `"flip"` or `"match"`.
    pub action_type: String,
    #[serde(default)]
    pub flavor_text: Option<String>,
    pub created_at: Timestamp,
}

/// Complete authoritative state of one game, as seen by one viewer.
///
/// A snapshot always replaces the previous one wholesale. Fields are never
/// merged with older snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub game: GameInfo,
    #[serde(default)]
    pub players: Vec<PlayerSummary>,
    #[serde(default)]
    pub pyramid: Vec<PyramidCell>,
    #[serde(default)]
    pub my_hand: Vec<Card>,
    #[serde(default)]
    pub current_flipped_card: Option<FlippedCard>,
    #[serde(default)]
    pub needs_flip: bool,
    #[serde(default)]
    pub is_my_match_turn: bool,
    #[serde(default)]
    pub can_match: bool,
    #[serde(default)]
    pub matchable_cards: Vec<Card>,
    #[serde(default)]
    pub is_bus_player: bool,
    #[serde(default)]
    pub recent_log: Vec<LogEntry>,
    #[serde(default)]
    pub my_id: Option<PlayerId>,
}

impl Snapshot {
    /// Identifier of the game this snapshot describes.
    pub fn game_id(&self) -> GameId {
        self.game.id
    }

    /// Combined lifecycle derived from status and phase.
    pub fn lifecycle(&self) -> Lifecycle {
        match self.game.status {
            GameStatus::Lobby => Lifecycle::Lobby,
            GameStatus::Finished => Lifecycle::Finished,
            GameStatus::Active => match self.game.current_phase.unwrap_or_default() {
                GamePhase::Pyramid => Lifecycle::Pyramid,
                GamePhase::Bus => Lifecycle::Bus,
            },
        }
    }

    /// Returns `true` when the viewer holds action priority: it is their
    /// match turn or they are riding the bus.
    pub fn viewer_has_priority(&self) -> bool {
        self.is_my_match_turn || self.is_bus_player
    }

    /// Newest log timestamp, or `0` for an empty log.
    pub fn newest_log_timestamp(&self) -> Timestamp {
        self.recent_log
            .iter()
            .map(|entry| entry.created_at)
            .max()
            .unwrap_or(0)
    }

    /// Returns `true` if the service marked `card` as matchable for the viewer.
    pub fn is_matchable(&self, card: &Card) -> bool {
        self.can_match && self.matchable_cards.contains(card)
    }

    /// Looks up a player by id.
    pub fn player(&self, id: PlayerId) -> Option<&PlayerSummary> {
        self.players.iter().find(|p| p.user_id == id)
    }

    /// The player currently riding the bus, if any.
    pub fn bus_player(&self) -> Option<&PlayerSummary> {
        self.game.bus_player_id.and_then(|id| self.player(id))
    }
}

// ── Lobby ───────────────────────────────────────────────────────────

/// One game as listed in the lobby.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSummary {
    pub id: GameId,
    pub status: GameStatus,
    #[serde(default)]
    pub current_phase: Option<GamePhase>,
    #[serde(default)]
    pub created_by: Option<PlayerId>,
    #[serde(default)]
    pub creator_name: Option<String>,
    #[serde(default)]
    pub creator_username: Option<String>,
    #[serde(default)]
    pub players: Vec<PlayerSummary>,
}

/// Lobby listing for the requesting viewer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LobbyListing {
    #[serde(default)]
    pub my_id: Option<PlayerId>,
    #[serde(default)]
    pub my_games: Vec<GameSummary>,
    #[serde(default)]
    pub open_games: Vec<GameSummary>,
    #[serde(default)]
    pub recent_finished: Vec<GameSummary>,
}

// ── Actions ─────────────────────────────────────────────────────────

/// Kind of a state-changing action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Create,
    Join,
    Start,
    Flip,
    Match,
    Pass,
    BusGuess,
    Leave,
}

/// Alert text for a failure with nothing more specific to say.
pub const GENERIC_FAILURE_MESSAGE: &str = "Greska";

impl ActionKind {
    /// Alert text when this action fails before the service could explain why.
    pub fn fallback_message(self) -> &'static str {
        match self {
            Self::Create => "Greska pri kreiranju igre",
            Self::Join => "Greska pri pridruzivanju",
            Self::Start => "Greska pri pokretanju",
            Self::Flip => "Greska pri okretanju karte",
            Self::Match => "Greska pri matchovanju",
            Self::BusGuess => "Greska pri pogadjanju",
            Self::Pass | Self::Leave => GENERIC_FAILURE_MESSAGE,
        }
    }

    /// Wire name of the action (`op` query value / push call name).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Join => "join",
            Self::Start => "start",
            Self::Flip => "flip",
            Self::Match => "match",
            Self::Pass => "pass",
            Self::BusGuess => "bus_guess",
            Self::Leave => "leave",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state-changing request sent to the game service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GameAction {
    Create,
    Join {
        game_id: GameId,
    },
    Start {
        game_id: GameId,
    },
    Flip {
        game_id: GameId,
    },
    Match {
        game_id: GameId,
        card: Card,
        target_user_id: PlayerId,
    },
    Pass {
        game_id: GameId,
    },
    BusGuess {
        game_id: GameId,
        guess: GuessDirection,
    },
    Leave {
        game_id: GameId,
    },
}

impl GameAction {
    /// Kind of this action.
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Create => ActionKind::Create,
            Self::Join { .. } => ActionKind::Join,
            Self::Start { .. } => ActionKind::Start,
            Self::Flip { .. } => ActionKind::Flip,
            Self::Match { .. } => ActionKind::Match,
            Self::Pass { .. } => ActionKind::Pass,
            Self::BusGuess { .. } => ActionKind::BusGuess,
            Self::Leave { .. } => ActionKind::Leave,
        }
    }

    /// Game the action targets. `None` only for `Create`.
    pub fn game_id(&self) -> Option<GameId> {
        match self {
            Self::Create => None,
            Self::Join { game_id }
            | Self::Start { game_id }
            | Self::Flip { game_id }
            | Self::Match { game_id, .. }
            | Self::Pass { game_id }
            | Self::BusGuess { game_id, .. }
            | Self::Leave { game_id } => Some(*game_id),
        }
    }

    /// JSON request body for payload-bearing actions.
    pub fn body(&self) -> Option<serde_json::Value> {
        match self {
            Self::Match {
                card,
                target_user_id,
                ..
            } => Some(serde_json::json!({ "card": card, "target_user_id": target_user_id })),
            Self::BusGuess { guess, .. } => Some(serde_json::json!({ "guess": guess })),
            _ => None,
        }
    }

    /// Returns `true` for actions played inside an open game view.
    pub fn is_in_game(&self) -> bool {
        matches!(
            self.kind(),
            ActionKind::Flip | ActionKind::Match | ActionKind::Pass | ActionKind::BusGuess
        )
    }
}

/// Success payload of an action.
///
/// Which fields are present depends on the action. The optimistic layer only
/// ever copies values from here, it never invents them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActionReply {
    #[serde(default)]
    pub ok: bool,
    /// Card revealed by a flip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card: Option<Card>,
    /// Drink value of the revealed card.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drink_value: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drinks_given: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cards_left: Option<u32>,
    /// New visible bus card after a guess.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_card: Option<Card>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bus_progress: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flavor_text: Option<String>,
    /// Game created by a `create` action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_id: Option<GameId>,
}

impl ActionReply {
    /// Short local description of what the action did, built only from
    /// fields present in the reply.
    pub fn summary(&self, kind: ActionKind) -> Option<String> {
        match kind {
            ActionKind::Flip => self.card.as_ref().map(|card| match self.drink_value {
                Some(drinks) => format!("Okrenuta: {card} ({drinks} cugova)"),
                None => format!("Okrenuta: {card}"),
            }),
            ActionKind::Match => self.drinks_given.map(|given| match self.cards_left {
                Some(left) => format!("Match! Dao si {given} cug(ova)! Ostalo ti {left} karata."),
                None => format!("Match! Dao si {given} cug(ova)!"),
            }),
            ActionKind::BusGuess => self.flavor_text.clone(),
            _ => None,
        }
    }
}

/// Error body returned by the service for rejected requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

// ── Push channel messages ───────────────────────────────────────────

/// A correlated remote call issued over the push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum RemoteCall {
    /// Perform a state-changing action.
    Action(GameAction),
    /// Read the current snapshot of a game.
    FetchState { game_id: GameId },
    /// Read the lobby listing.
    FetchLobby,
}

/// Outcome of a correlated remote call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    /// Success payload. Its shape depends on the call.
    Ok(serde_json::Value),
    /// Rejection with a human-readable reason.
    Error { message: String },
}

/// Messages sent from client to server over the push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Handshake. MUST be the first message on every connection.
    Identify {
        player_id: PlayerId,
        display_name: String,
    },
    /// Correlated remote call. The server answers with a `CallResult`
    /// carrying the same `request_id`.
    Call { request_id: u64, call: RemoteCall },
}

/// Messages sent from server to client over the push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Identify handshake accepted.
    Identified { player_id: PlayerId },
    /// Unsolicited snapshot of a game the viewer takes part in
    /// (boxed to reduce enum size).
    Snapshot(Box<Snapshot>),
    /// Result of a correlated remote call.
    CallResult {
        request_id: u64,
        result: CallOutcome,
    },
    /// A player joined a game.
    PlayerJoined {
        game_id: GameId,
        player: PlayerSummary,
    },
    /// A player left a game.
    PlayerLeft {
        game_id: GameId,
        player_id: PlayerId,
    },
    /// A game finished.
    GameEnded { game_id: GameId },
    /// Uncorrelated server error.
    Error { message: String },
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn fixture() -> &'static str {
        r#"{
            "game": {
                "id": "00000000-0000-0000-0000-000000000007",
                "status": "active",
                "current_phase": "pyramid",
                "current_card_index": 2,
                "matching_done": false,
                "match_turn_index": 1,
                "bus_player_id": null,
                "bus_current_card": null,
                "bus_progress": 0,
                "created_by": 11
            },
            "players": [
                { "user_id": 11, "first_name": "Ana", "hand_count": 4, "drinks_received": 2, "is_match_turn": true },
                { "user_id": 12, "username": "bojan", "hand_count": 5, "drinks_received": 0, "is_match_turn": false }
            ],
            "pyramid": [
                { "index": 0, "row": 5, "rank": "7", "suit": "♥️", "flipped": true },
                { "index": 1, "row": 5, "flipped": false }
            ],
            "my_hand": [{ "rank": "7", "suit": "♣️" }],
            "current_flipped_card": { "rank": "7", "suit": "♥️", "index": 2, "drinkValue": 1 },
            "needs_flip": false,
            "is_my_match_turn": true,
            "can_match": true,
            "matchable_cards": [{ "rank": "7", "suit": "♣️" }],
            "is_bus_player": false,
            "recent_log": [
                { "action_type": "match", "flavor_text": "Ana daje 1 cug", "created_at": 300 },
                { "action_type": "flip", "flavor_text": null, "created_at": 200 }
            ],
            "my_id": 11
        }"#
    }

    #[test]
    fn decodes_service_snapshot() {
        let snapshot: Snapshot = serde_json::from_str(fixture()).unwrap();
        assert_eq!(snapshot.game_id(), Uuid::from_u128(7));
        assert_eq!(snapshot.lifecycle(), Lifecycle::Pyramid);
        assert!(snapshot.viewer_has_priority());
        assert_eq!(snapshot.newest_log_timestamp(), 300);
        assert_eq!(snapshot.current_flipped_card.as_ref().unwrap().drink_value, 1);
        assert!(snapshot.is_matchable(&Card::new("7", "♣️")));
        assert!(!snapshot.is_matchable(&Card::new("7", "♥️")));
        assert_eq!(snapshot.player(12).unwrap().display_name(), "bojan");
        assert!(snapshot.pyramid[1].card().is_none());
        assert_eq!(snapshot.pyramid[0].card(), Some(Card::new("7", "♥️")));
    }

    #[test]
    fn minimal_snapshot_uses_defaults() {
        let json = r#"{ "game": { "id": "00000000-0000-0000-0000-000000000001", "status": "lobby" } }"#;
        let snapshot: Snapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.lifecycle(), Lifecycle::Lobby);
        assert_eq!(snapshot.game.current_card_index, -1);
        assert_eq!(snapshot.newest_log_timestamp(), 0);
        assert!(!snapshot.viewer_has_priority());
    }

    #[test]
    fn lifecycle_maps_status_and_phase() {
        let mut snapshot: Snapshot = serde_json::from_str(fixture()).unwrap();
        snapshot.game.current_phase = Some(GamePhase::Bus);
        assert_eq!(snapshot.lifecycle(), Lifecycle::Bus);
        assert!(snapshot.lifecycle().is_active());
        snapshot.game.status = GameStatus::Finished;
        assert_eq!(snapshot.lifecycle(), Lifecycle::Finished);
        assert!(!snapshot.lifecycle().is_active());
    }

    #[test]
    fn suit_colors() {
        assert_eq!(Card::new("A", "♥️").color(), SuitColor::Red);
        assert_eq!(Card::new("A", "♦").color(), SuitColor::Red);
        assert_eq!(Card::new("A", "♠️").color(), SuitColor::Black);
        assert_eq!(Card::new("A", "♣️").color(), SuitColor::Black);
        assert_eq!(Card::new("A", "x").color(), SuitColor::Unknown);
    }

    #[test]
    fn fallback_messages_name_the_action() {
        assert_eq!(ActionKind::Flip.fallback_message(), "Greska pri okretanju karte");
        assert_eq!(ActionKind::Match.fallback_message(), "Greska pri matchovanju");
        assert_eq!(ActionKind::BusGuess.fallback_message(), "Greska pri pogadjanju");
        assert_eq!(ActionKind::Create.fallback_message(), "Greska pri kreiranju igre");
        assert_eq!(ActionKind::Pass.fallback_message(), GENERIC_FAILURE_MESSAGE);
    }

    #[test]
    fn row_drink_values() {
        assert_eq!(row_drink_value(1), Some(5));
        assert_eq!(row_drink_value(5), Some(1));
        assert_eq!(row_drink_value(0), None);
        assert_eq!(row_drink_value(6), None);
    }

    #[test]
    fn display_name_falls_back() {
        let player = PlayerSummary {
            user_id: 1,
            first_name: Some(String::new()),
            username: None,
            hand_count: 0,
            drinks_received: 0,
            is_match_turn: false,
        };
        assert_eq!(player.display_name(), FALLBACK_PLAYER_NAME);
    }

    #[test]
    fn action_bodies() {
        let game_id = Uuid::from_u128(1);
        let action = GameAction::Match {
            game_id,
            card: Card::new("Q", "♦️"),
            target_user_id: 42,
        };
        assert_eq!(action.kind().as_str(), "match");
        assert_eq!(
            action.body().unwrap(),
            serde_json::json!({ "card": { "rank": "Q", "suit": "♦️" }, "target_user_id": 42 })
        );

        let guess = GameAction::BusGuess {
            game_id,
            guess: GuessDirection::Higher,
        };
        assert_eq!(guess.kind().to_string(), "bus_guess");
        assert_eq!(guess.body().unwrap(), serde_json::json!({ "guess": "higher" }));
        assert!(GameAction::Create.body().is_none());
        assert!(GameAction::Create.game_id().is_none());
        assert!(!GameAction::Start { game_id }.is_in_game());
        assert!(GameAction::Pass { game_id }.is_in_game());
    }

    #[test]
    fn reply_summary_uses_only_reply_fields() {
        let reply = ActionReply {
            ok: true,
            card: Some(Card::new("K", "♠️")),
            drink_value: Some(3),
            ..Default::default()
        };
        assert_eq!(
            reply.summary(ActionKind::Flip).as_deref(),
            Some("Okrenuta: K♠️ (3 cugova)")
        );
        assert!(reply.summary(ActionKind::Match).is_none());
        assert!(ActionReply::default().summary(ActionKind::Flip).is_none());
    }

    #[test]
    fn push_messages_use_type_data_tagging() {
        let msg = ClientMessage::Call {
            request_id: 3,
            call: RemoteCall::Action(GameAction::Flip {
                game_id: Uuid::nil(),
            }),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "call");
        assert_eq!(value["data"]["request_id"], 3);
        assert_eq!(value["data"]["call"]["method"], "action");
        assert_eq!(value["data"]["call"]["params"]["action"], "flip");

        let json = r#"{ "type": "call_result", "data": { "request_id": 3, "result": { "error": { "message": "Nije tvoj red" } } } }"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            ServerMessage::CallResult {
                request_id: 3,
                result: CallOutcome::Error {
                    message: "Nije tvoj red".into()
                },
            }
        );
    }
}
