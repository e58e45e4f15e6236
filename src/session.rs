//! Per-game session state: store, log cursor, toast slot and the action slot.
//!
//! [`GameSession`] is plain synchronous state. The engine task owns it and
//! drives it from transport results, so every mutation happens on one owner
//! in the order results arrive.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::notify::{NotificationTranslator, Toast, ToastSlot};
use crate::optimistic::{apply_optimistic, OptimisticAction};
use crate::protocol::{ActionKind, ActionReply, GameAction, GameId, Snapshot};
use crate::store::{ApplyOutcome, Overlay, StateStore};

/// Result of ingesting an authoritative snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Ingested {
    pub outcome: ApplyOutcome,
    /// Toast produced by this snapshot's log tail.
    pub toast: Option<Toast>,
    /// Toast that was still visible and got replaced.
    pub replaced: Option<Toast>,
}

impl Ingested {
    /// Returns `true` if the snapshot changed the visible state.
    pub fn applied(&self) -> bool {
        self.outcome == ApplyOutcome::Applied
    }
}

#[derive(Debug)]
struct InFlight {
    kind: ActionKind,
    optimistic: Option<OptimisticAction>,
    /// Set when an authoritative snapshot lands while the action is pending.
    superseded: bool,
}

/// Everything the engine tracks for the open game.
#[derive(Debug)]
pub struct GameSession {
    store: StateStore,
    translator: NotificationTranslator,
    toast: ToastSlot,
    in_flight: Option<InFlight>,
}

impl GameSession {
    /// Create a session with no game open.
    pub fn new(toast_lifetime: Duration) -> Self {
        Self {
            store: StateStore::new(),
            translator: NotificationTranslator::new(),
            toast: ToastSlot::new(toast_lifetime),
            in_flight: None,
        }
    }

    /// Make `game_id` the active game, discarding all state of the previous one.
    pub fn open_game(&mut self, game_id: GameId) {
        if self.store.set_active_game(Some(game_id)) {
            self.translator.reset();
            self.toast.clear();
        }
    }

    /// Leave the game view.
    pub fn close_game(&mut self) {
        if self.store.set_active_game(None) {
            self.translator.reset();
            self.toast.clear();
        }
    }

    pub fn active_game(&self) -> Option<GameId> {
        self.store.active_game()
    }

    /// State to render: overlay if present, else confirmed.
    pub fn visible(&self) -> Option<&Snapshot> {
        self.store.visible()
    }

    pub fn confirmed(&self) -> Option<&Snapshot> {
        self.store.confirmed()
    }

    /// Returns `true` while the visible state is speculative.
    pub fn is_optimistic(&self) -> bool {
        self.store.overlay().is_some()
    }

    pub fn is_acting(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn toast(&self) -> Option<&Toast> {
        self.toast.current()
    }

    pub fn toast_deadline(&self) -> Option<Instant> {
        self.toast.deadline()
    }

    /// Clear the toast if it has outlived its lifetime.
    pub fn expire_toast(&mut self, now: Instant) -> Option<Toast> {
        self.toast.expire(now)
    }

    /// Apply an authoritative snapshot and translate its log tail.
    pub fn ingest(&mut self, snapshot: Snapshot, now: Instant) -> Ingested {
        let outcome = self.store.apply_snapshot(snapshot);
        let mut ingested = Ingested {
            outcome,
            toast: None,
            replaced: None,
        };
        if outcome != ApplyOutcome::Applied {
            return ingested;
        }

        if let Some(in_flight) = &mut self.in_flight {
            in_flight.superseded = true;
        }
        if let Some(confirmed) = self.store.confirmed() {
            if let Some(toast) = self.translator.observe(confirmed) {
                ingested.replaced = self.toast.show(toast.clone(), now);
                ingested.toast = Some(toast);
            }
        }
        ingested
    }

    /// Claim the action slot for `action`.
    ///
    /// # Errors
    ///
    /// - [`SyncError::ActionInFlight`] if another action is pending.
    /// - [`SyncError::NoActiveGame`] if an in-game action targets a game that is
    ///   not open, or no snapshot has been received for it yet.
    pub fn begin_action(&mut self, action: &GameAction) -> Result<()> {
        if self.in_flight.is_some() {
            return Err(SyncError::ActionInFlight);
        }
        if action.is_in_game()
            && (action.game_id() != self.store.active_game() || self.store.confirmed().is_none())
        {
            return Err(SyncError::NoActiveGame);
        }
        self.in_flight = Some(InFlight {
            kind: action.kind(),
            optimistic: OptimisticAction::for_action(action),
            superseded: false,
        });
        Ok(())
    }

    /// Install the overlay for actions whose effect is known before the reply.
    ///
    /// Returns `true` if the visible state changed.
    pub fn apply_before_dispatch(&mut self) -> bool {
        let Some(optimistic) = self
            .in_flight
            .as_ref()
            .and_then(|in_flight| in_flight.optimistic.clone())
        else {
            return false;
        };
        if optimistic.needs_reply() {
            return false;
        }
        self.install(optimistic, None)
    }

    /// Settle the pending action with its result and release the slot.
    ///
    /// On success, actions whose effect depends on the reply get their
    /// overlay now, unless a newer snapshot already arrived. On failure any
    /// overlay is discarded. Returns `true` if the visible state changed.
    pub fn complete_action(&mut self, result: &Result<ActionReply>) -> bool {
        let Some(in_flight) = self.in_flight.take() else {
            warn!("session: completion without a pending action");
            return false;
        };

        match result {
            Ok(reply) => match in_flight.optimistic {
                Some(optimistic) if optimistic.needs_reply() && !in_flight.superseded => {
                    self.install(optimistic, Some(reply))
                }
                _ => false,
            },
            Err(error) => {
                debug!(kind = %in_flight.kind, %error, "session: action failed");
                self.store.discard_overlay().is_some()
            }
        }
    }

    fn install(&mut self, action: OptimisticAction, reply: Option<&ActionReply>) -> bool {
        let Some(base) = self.store.confirmed() else {
            return false;
        };
        let Some(snapshot) = apply_optimistic(&action, base, reply) else {
            debug!(?action, "session: reply carried nothing to apply");
            return false;
        };
        match self.store.install_overlay(Overlay { action, snapshot }) {
            Ok(()) => true,
            Err(error) => {
                warn!(%error, "session: overlay rejected");
                false
            }
        }
    }
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
    use crate::notify::ToastKind;
    use crate::protocol::{Card, LogEntry};
    use uuid::Uuid;

    const GAME: Uuid = Uuid::from_u128(7);

    fn snapshot(newest: i64) -> Snapshot {
        let json = serde_json::json!({
            "game": { "id": GAME, "status": "active", "current_phase": "pyramid", "current_card_index": 0 },
            "pyramid": [
                { "index": 0, "row": 5, "rank": "4", "suit": "♦️", "flipped": true },
                { "index": 1, "row": 5, "flipped": false }
            ],
            "my_hand": [ { "rank": "4", "suit": "♠️" } ],
            "needs_flip": true,
            "is_my_match_turn": true,
            "can_match": true,
            "matchable_cards": [ { "rank": "4", "suit": "♠️" } ],
            "recent_log": [ { "action_type": "flip", "created_at": newest } ]
        });
        serde_json::from_value(json).unwrap()
    }

    fn session() -> GameSession {
        let mut session = GameSession::new(Duration::from_secs(4));
        session.open_game(GAME);
        session.ingest(snapshot(100), Instant::now());
        session
    }

    fn flip_reply() -> ActionReply {
        ActionReply {
            ok: true,
            card: Some(Card::new("K", "♠️")),
            drink_value: Some(1),
            ..Default::default()
        }
    }

    #[test]
    fn only_one_action_at_a_time() {
        let mut session = session();
        session.begin_action(&GameAction::Flip { game_id: GAME }).unwrap();
        assert!(matches!(
            session.begin_action(&GameAction::Pass { game_id: GAME }),
            Err(SyncError::ActionInFlight)
        ));
        session.complete_action(&Ok(flip_reply()));
        session.begin_action(&GameAction::Pass { game_id: GAME }).unwrap();
    }

    #[test]
    fn in_game_action_needs_open_game() {
        let mut session = GameSession::new(Duration::from_secs(4));
        assert!(matches!(
            session.begin_action(&GameAction::Flip { game_id: GAME }),
            Err(SyncError::NoActiveGame)
        ));
        // Lobby actions need no open game.
        session.begin_action(&GameAction::Create).unwrap();
    }

    #[test]
    fn pass_is_applied_before_dispatch_and_reverted_on_failure() {
        let mut session = session();
        session.begin_action(&GameAction::Pass { game_id: GAME }).unwrap();
        assert!(session.apply_before_dispatch());
        assert!(session.is_optimistic());
        assert!(!session.visible().unwrap().is_my_match_turn);

        let changed = session.complete_action(&Err(SyncError::ActionRejected {
            message: "Nije tvoj red".into(),
        }));
        assert!(changed);
        assert!(!session.is_optimistic());
        assert!(session.visible().unwrap().is_my_match_turn);
        assert!(!session.is_acting());
    }

    #[test]
    fn flip_overlay_waits_for_reply() {
        let mut session = session();
        session.begin_action(&GameAction::Flip { game_id: GAME }).unwrap();
        assert!(!session.apply_before_dispatch());
        assert!(!session.is_optimistic());

        assert!(session.complete_action(&Ok(flip_reply())));
        let visible = session.visible().unwrap();
        assert_eq!(visible.pyramid[1].card(), Some(Card::new("K", "♠️")));
        assert!(!visible.needs_flip);
    }

    #[test]
    fn confirmation_replaces_overlay() {
        let mut session = session();
        session.begin_action(&GameAction::Flip { game_id: GAME }).unwrap();
        session.complete_action(&Ok(flip_reply()));

        let mut confirmed = snapshot(200);
        confirmed.pyramid[1].flipped = true;
        confirmed.pyramid[1].rank = Some("K".into());
        confirmed.pyramid[1].suit = Some("♠️".into());
        confirmed.game.current_card_index = 1;
        confirmed.needs_flip = false;
        let ingested = session.ingest(confirmed.clone(), Instant::now());
        assert!(ingested.applied());
        assert!(!session.is_optimistic());
        assert_eq!(session.visible(), Some(&confirmed));
    }

    #[test]
    fn snapshot_during_flight_skips_late_overlay() {
        let mut session = session();
        session.begin_action(&GameAction::Flip { game_id: GAME }).unwrap();
        let newer = snapshot(300);
        session.ingest(newer.clone(), Instant::now());
        assert!(!session.complete_action(&Ok(flip_reply())));
        assert_eq!(session.visible(), Some(&newer));
    }

    #[test]
    fn ingest_produces_one_toast_per_new_tail() {
        let mut session = session();
        let mut next = snapshot(200);
        next.recent_log = vec![
            LogEntry {
                action_type: "match".into(),
                flavor_text: Some("Ana -> Marko".into()),
                created_at: 190,
            },
            LogEntry {
                action_type: "match".into(),
                flavor_text: Some("Marko -> Ana".into()),
                created_at: 200,
            },
        ];
        let now = Instant::now();
        let ingested = session.ingest(next.clone(), now);
        let toast = ingested.toast.unwrap();
        assert_eq!(toast.kind, ToastKind::Match);
        assert_eq!(toast.text, "Marko -> Ana");
        assert_eq!(session.toast(), Some(&toast));

        // Same tail again is stale: no second toast.
        let again = session.ingest(next, now);
        assert!(!again.applied());
        assert!(again.toast.is_none());
    }

    #[test]
    fn reopening_a_game_resets_state() {
        let mut session = session();
        session.close_game();
        assert!(session.visible().is_none());
        session.open_game(GAME);
        assert!(session.ingest(snapshot(100), Instant::now()).applied());
    }
}
