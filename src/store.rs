//! Local mirror of the active game's authoritative state.
//!
//! [`StateStore`] keeps the last confirmed [`Snapshot`] of the active game and
//! at most one optimistic [`Overlay`] on top of it. Authoritative snapshots
//! replace the confirmed one wholesale and always discard the overlay. A
//! snapshot whose newest log timestamp is not strictly newer than the one
//! already applied is dropped as stale, so a slow poll response can never
//! regress state a faster push already delivered.

use tracing::debug;

use crate::error::{Result, SyncError};
use crate::optimistic::OptimisticAction;
use crate::protocol::{GameId, Snapshot, Timestamp};

/// Speculative snapshot for one in-flight action.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub action: OptimisticAction,
    pub snapshot: Snapshot,
}

/// Result of offering an authoritative snapshot to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The snapshot is now the confirmed state.
    Applied,
    /// The snapshot's log is not newer than the applied one; nothing changed.
    Stale {
        newest: Timestamp,
        applied: Timestamp,
    },
    /// The snapshot belongs to a game other than the active one.
    WrongGame,
    /// No game is active.
    NoActiveGame,
}

/// Confirmed snapshot plus single-slot overlay for the active game.
#[derive(Debug, Default)]
pub struct StateStore {
    game_id: Option<GameId>,
    confirmed: Option<Snapshot>,
    overlay: Option<Overlay>,
    applied_mark: Timestamp,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch the active game. Everything held for the previous game is dropped.
    ///
    /// Returns `true` if the active game changed.
    pub fn set_active_game(&mut self, game_id: Option<GameId>) -> bool {
        if self.game_id == game_id {
            return false;
        }
        debug!(from = ?self.game_id, to = ?game_id, "store: active game changed");
        *self = Self {
            game_id,
            ..Self::default()
        };
        true
    }

    /// Identifier of the active game.
    pub fn active_game(&self) -> Option<GameId> {
        self.game_id
    }

    /// Last confirmed snapshot.
    pub fn confirmed(&self) -> Option<&Snapshot> {
        self.confirmed.as_ref()
    }

    /// The pending overlay, if any.
    pub fn overlay(&self) -> Option<&Overlay> {
        self.overlay.as_ref()
    }

    /// What the user should see: the overlay if one exists, else the confirmed snapshot.
    pub fn visible(&self) -> Option<&Snapshot> {
        self.overlay
            .as_ref()
            .map(|overlay| &overlay.snapshot)
            .or(self.confirmed.as_ref())
    }

    /// Newest log timestamp of the confirmed snapshot.
    pub fn applied_mark(&self) -> Timestamp {
        self.applied_mark
    }

    /// Offer an authoritative snapshot.
    ///
    /// The first snapshot of a game is always applied. Later ones are applied
    /// only when their newest log timestamp is strictly greater than the
    /// applied one. Applying discards the overlay.
    pub fn apply_snapshot(&mut self, snapshot: Snapshot) -> ApplyOutcome {
        let Some(active) = self.game_id else {
            return ApplyOutcome::NoActiveGame;
        };
        if snapshot.game_id() != active {
            debug!(got = %snapshot.game_id(), %active, "store: snapshot for another game ignored");
            return ApplyOutcome::WrongGame;
        }

        let newest = snapshot.newest_log_timestamp();
        if self.confirmed.is_some() && newest <= self.applied_mark {
            debug!(newest, applied = self.applied_mark, "store: stale snapshot ignored");
            return ApplyOutcome::Stale {
                newest,
                applied: self.applied_mark,
            };
        }

        if let Some(overlay) = self.overlay.take() {
            debug!(action = ?overlay.action, "store: overlay superseded by snapshot");
        }
        self.confirmed = Some(snapshot);
        self.applied_mark = newest;
        ApplyOutcome::Applied
    }

    /// Install the overlay for the in-flight action.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ActionInFlight`] if an overlay is already held, and
    /// [`SyncError::NoActiveGame`] if the overlay is for another game.
    pub fn install_overlay(&mut self, overlay: Overlay) -> Result<()> {
        if self.overlay.is_some() {
            return Err(SyncError::ActionInFlight);
        }
        if Some(overlay.snapshot.game_id()) != self.game_id {
            return Err(SyncError::NoActiveGame);
        }
        debug!(action = ?overlay.action, "store: overlay installed");
        self.overlay = Some(overlay);
        Ok(())
    }

    /// Drop the overlay, reverting the visible state to the confirmed snapshot.
    pub fn discard_overlay(&mut self) -> Option<Overlay> {
        let overlay = self.overlay.take();
        if let Some(overlay) = &overlay {
            debug!(action = ?overlay.action, "store: overlay discarded");
        }
        overlay
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
    use crate::optimistic::apply_optimistic;
    use crate::protocol::LogEntry;
    use uuid::Uuid;

    fn snapshot(game: u128, newest: Timestamp, my_turn: bool) -> Snapshot {
        let json = serde_json::json!({
            "game": { "id": Uuid::from_u128(game), "status": "active", "current_phase": "pyramid" },
            "is_my_match_turn": my_turn,
            "can_match": my_turn,
            "my_hand": [ { "rank": "2", "suit": "♥️" } ]
        });
        let mut snapshot: Snapshot = serde_json::from_value(json).unwrap();
        if newest > 0 {
            snapshot.recent_log.push(LogEntry {
                action_type: "flip".into(),
                flavor_text: None,
                created_at: newest,
            });
        }
        snapshot
    }

    fn pass_overlay(base: &Snapshot) -> Overlay {
        Overlay {
            action: OptimisticAction::PassTurn,
            snapshot: apply_optimistic(&OptimisticAction::PassTurn, base, None).unwrap(),
        }
    }

    #[test]
    fn first_snapshot_applies_even_with_empty_log() {
        let mut store = StateStore::new();
        store.set_active_game(Some(Uuid::from_u128(1)));
        assert_eq!(store.apply_snapshot(snapshot(1, 0, false)), ApplyOutcome::Applied);
        assert!(store.confirmed().is_some());
    }

    #[test]
    fn snapshot_supersedes_overlay_exactly() {
        let mut store = StateStore::new();
        store.set_active_game(Some(Uuid::from_u128(1)));
        let base = snapshot(1, 100, true);
        store.apply_snapshot(base.clone());
        store.install_overlay(pass_overlay(&base)).unwrap();
        assert!(!store.visible().unwrap().is_my_match_turn);

        let next = snapshot(1, 150, true);
        assert_eq!(store.apply_snapshot(next.clone()), ApplyOutcome::Applied);
        assert!(store.overlay().is_none());
        assert_eq!(store.visible(), Some(&next));
    }

    #[test]
    fn stale_snapshot_does_not_overwrite() {
        let mut store = StateStore::new();
        store.set_active_game(Some(Uuid::from_u128(1)));
        let fresh = snapshot(1, 150, false);
        store.apply_snapshot(fresh.clone());

        let mut late = snapshot(1, 150, true);
        late.my_hand.clear();
        assert_eq!(
            store.apply_snapshot(late),
            ApplyOutcome::Stale {
                newest: 150,
                applied: 150
            }
        );
        assert_eq!(
            store.apply_snapshot(snapshot(1, 120, true)),
            ApplyOutcome::Stale {
                newest: 120,
                applied: 150
            }
        );
        assert_eq!(store.confirmed(), Some(&fresh));
        assert_eq!(store.applied_mark(), 150);
    }

    #[test]
    fn stale_snapshot_keeps_overlay() {
        let mut store = StateStore::new();
        store.set_active_game(Some(Uuid::from_u128(1)));
        let base = snapshot(1, 100, true);
        store.apply_snapshot(base.clone());
        store.install_overlay(pass_overlay(&base)).unwrap();

        store.apply_snapshot(snapshot(1, 100, true));
        assert!(store.overlay().is_some());
    }

    #[test]
    fn overlay_is_single_slot() {
        let mut store = StateStore::new();
        store.set_active_game(Some(Uuid::from_u128(1)));
        let base = snapshot(1, 100, true);
        store.apply_snapshot(base.clone());
        store.install_overlay(pass_overlay(&base)).unwrap();
        assert!(matches!(
            store.install_overlay(pass_overlay(&base)),
            Err(SyncError::ActionInFlight)
        ));
    }

    #[test]
    fn discard_reverts_to_confirmed() {
        let mut store = StateStore::new();
        store.set_active_game(Some(Uuid::from_u128(1)));
        let base = snapshot(1, 100, true);
        store.apply_snapshot(base.clone());
        store.install_overlay(pass_overlay(&base)).unwrap();
        assert!(store.discard_overlay().is_some());
        assert_eq!(store.visible(), Some(&base));
        assert!(store.discard_overlay().is_none());
    }

    #[test]
    fn wrong_game_and_no_game() {
        let mut store = StateStore::new();
        assert_eq!(
            store.apply_snapshot(snapshot(1, 100, false)),
            ApplyOutcome::NoActiveGame
        );
        store.set_active_game(Some(Uuid::from_u128(2)));
        assert_eq!(
            store.apply_snapshot(snapshot(1, 100, false)),
            ApplyOutcome::WrongGame
        );
        let other = snapshot(1, 100, true);
        assert!(matches!(
            store.install_overlay(pass_overlay(&other)),
            Err(SyncError::NoActiveGame)
        ));
    }

    #[test]
    fn switching_games_resets_everything() {
        let mut store = StateStore::new();
        store.set_active_game(Some(Uuid::from_u128(1)));
        store.apply_snapshot(snapshot(1, 500, false));
        assert!(!store.set_active_game(Some(Uuid::from_u128(1))));
        assert!(store.set_active_game(Some(Uuid::from_u128(2))));
        assert!(store.confirmed().is_none());
        assert_eq!(store.applied_mark(), 0);
        assert_eq!(
            store.apply_snapshot(snapshot(2, 10, false)),
            ApplyOutcome::Applied
        );
    }
}
