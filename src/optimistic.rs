//! Speculative snapshot mutations for the viewer's own actions.
//!
//! [`apply_optimistic`] is a pure function of the last confirmed snapshot and
//! the action's own synchronous reply. It copies what the service disclosed
//! (the revealed card, the new bus card) and clears flags the action made
//! stale. It never invents a card or a drink count.

use crate::protocol::{row_drink_value, ActionReply, Card, FlippedCard, GameAction, Snapshot};

/// Action with a speculative effect on the local snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptimisticAction {
    /// Reveal the next pyramid cell. Needs the flip reply's card.
    RevealNextCard,
    /// Play `card` from the hand against the revealed card.
    SubmitMatch { card: Card },
    /// Give up the current match turn.
    PassTurn,
    /// Guess the next bus card. Needs the reply's new bus card.
    BusGuess,
}

impl OptimisticAction {
    /// Speculative counterpart of `action`, if it has one.
    pub fn for_action(action: &GameAction) -> Option<Self> {
        match action {
            GameAction::Flip { .. } => Some(Self::RevealNextCard),
            GameAction::Match { card, .. } => Some(Self::SubmitMatch { card: card.clone() }),
            GameAction::Pass { .. } => Some(Self::PassTurn),
            GameAction::BusGuess { .. } => Some(Self::BusGuess),
            _ => None,
        }
    }

    /// Returns `true` if the overlay can only be built from the action's reply.
    pub fn needs_reply(&self) -> bool {
        matches!(self, Self::RevealNextCard | Self::BusGuess)
    }
}

/// Build the overlay snapshot for `action` on top of `base`.
///
/// Returns `None` when the reply lacks the data the mutation would have to
/// copy (e.g. a flip reply without a card), or when the next pyramid cell
/// does not exist. A flip reply without a drink value falls back to the
/// cell's row rule; if the row is out of range too, there is no overlay.
/// `base` is never modified.
pub fn apply_optimistic(
    action: &OptimisticAction,
    base: &Snapshot,
    reply: Option<&ActionReply>,
) -> Option<Snapshot> {
    match action {
        OptimisticAction::RevealNextCard => reveal_next_card(base, reply?),
        OptimisticAction::SubmitMatch { card } => {
            let mut overlay = base.clone();
            overlay.my_hand.retain(|held| held != card);
            clear_match_flags(&mut overlay);
            Some(overlay)
        }
        OptimisticAction::PassTurn => {
            let mut overlay = base.clone();
            clear_match_flags(&mut overlay);
            Some(overlay)
        }
        OptimisticAction::BusGuess => {
            let reply = reply?;
            let new_card = reply.new_card.clone()?;
            let mut overlay = base.clone();
            overlay.game.bus_current_card = Some(new_card);
            if let Some(progress) = reply.bus_progress {
                overlay.game.bus_progress = progress;
            }
            Some(overlay)
        }
    }
}

fn reveal_next_card(base: &Snapshot, reply: &ActionReply) -> Option<Snapshot> {
    let card = reply.card.as_ref()?;
    let next_index = base.game.current_card_index.checked_add(1)?;
    let cell_index = u32::try_from(next_index).ok()?;

    let mut overlay = base.clone();
    let cell = overlay.pyramid.iter_mut().find(|c| c.index == cell_index)?;
    let drink_value = reply.drink_value.or_else(|| row_drink_value(cell.row))?;
    cell.flipped = true;
    cell.rank = Some(card.rank.clone());
    cell.suit = Some(card.suit.clone());

    overlay.game.current_card_index = next_index;
    overlay.game.matching_done = false;
    overlay.game.match_turn_index = 0;
    overlay.current_flipped_card = Some(FlippedCard {
        rank: card.rank.clone(),
        suit: card.suit.clone(),
        index: next_index,
        drink_value,
    });
    overlay.needs_flip = false;
    clear_match_flags(&mut overlay);
    Some(overlay)
}

/// Clear the viewer's "may act" flags until the service says otherwise.
fn clear_match_flags(snapshot: &mut Snapshot) {
    snapshot.is_my_match_turn = false;
    snapshot.can_match = false;
    snapshot.matchable_cards.clear();
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
    use crate::protocol::{GuessDirection, PyramidCell};
    use uuid::Uuid;

    fn base() -> Snapshot {
        let json = serde_json::json!({
            "game": {
                "id": Uuid::from_u128(9),
                "status": "active",
                "current_phase": "pyramid",
                "current_card_index": 0,
                "matching_done": true,
                "match_turn_index": 2,
                "bus_progress": 1,
                "bus_current_card": { "rank": "5", "suit": "♦️" }
            },
            "pyramid": [
                { "index": 0, "row": 5, "rank": "3", "suit": "♣️", "flipped": true },
                { "index": 1, "row": 5, "flipped": false },
                { "index": 2, "row": 5, "flipped": false }
            ],
            "my_hand": [ { "rank": "3", "suit": "♥️" }, { "rank": "9", "suit": "♠️" } ],
            "needs_flip": true,
            "is_my_match_turn": true,
            "can_match": true,
            "matchable_cards": [ { "rank": "3", "suit": "♥️" } ]
        });
        serde_json::from_value(json).unwrap()
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
    fn reveal_copies_the_returned_card() {
        let base = base();
        let overlay =
            apply_optimistic(&OptimisticAction::RevealNextCard, &base, Some(&flip_reply())).unwrap();

        assert_eq!(overlay.game.current_card_index, 1);
        assert_eq!(overlay.pyramid[1].card(), Some(Card::new("K", "♠️")));
        assert!(!overlay.pyramid[2].flipped);
        assert!(!overlay.needs_flip);
        assert!(!overlay.game.matching_done);
        assert_eq!(overlay.game.match_turn_index, 0);
        assert!(!overlay.is_my_match_turn);
        assert!(overlay.matchable_cards.is_empty());
        let flipped = overlay.current_flipped_card.unwrap();
        assert_eq!(flipped.card(), Card::new("K", "♠️"));
        assert_eq!(flipped.index, 1);
        assert_eq!(flipped.drink_value, 1);

        // Pure: the base snapshot is untouched.
        assert_eq!(base, self::base());
    }

    #[test]
    fn reveal_without_card_builds_no_overlay() {
        let reply = ActionReply {
            ok: true,
            ..Default::default()
        };
        assert!(apply_optimistic(&OptimisticAction::RevealNextCard, &base(), Some(&reply)).is_none());
        assert!(apply_optimistic(&OptimisticAction::RevealNextCard, &base(), None).is_none());
    }

    #[test]
    fn reveal_without_drink_value_uses_the_row() {
        let reply = ActionReply {
            drink_value: None,
            ..flip_reply()
        };
        let mut base = base();
        base.pyramid[1].row = 2;
        let overlay =
            apply_optimistic(&OptimisticAction::RevealNextCard, &base, Some(&reply)).unwrap();
        assert_eq!(overlay.current_flipped_card.unwrap().drink_value, 4);

        // No value in the reply and no valid row: nothing to show.
        base.pyramid[1].row = 0;
        assert!(apply_optimistic(&OptimisticAction::RevealNextCard, &base, Some(&reply)).is_none());
    }

    #[test]
    fn reveal_past_the_last_cell_builds_no_overlay() {
        let mut base = base();
        base.pyramid = vec![PyramidCell {
            index: 0,
            row: 5,
            rank: None,
            suit: None,
            flipped: false,
        }];
        assert!(
            apply_optimistic(&OptimisticAction::RevealNextCard, &base, Some(&flip_reply())).is_none()
        );
    }

    #[test]
    fn match_removes_card_and_clears_flags() {
        let action = OptimisticAction::SubmitMatch {
            card: Card::new("3", "♥️"),
        };
        let overlay = apply_optimistic(&action, &base(), None).unwrap();
        assert_eq!(overlay.my_hand, vec![Card::new("9", "♠️")]);
        assert!(!overlay.is_my_match_turn);
        assert!(!overlay.can_match);
        assert!(overlay.matchable_cards.is_empty());
    }

    #[test]
    fn pass_only_clears_flags() {
        let base = base();
        let overlay = apply_optimistic(&OptimisticAction::PassTurn, &base, None).unwrap();
        assert_eq!(overlay.my_hand, base.my_hand);
        assert_eq!(overlay.pyramid, base.pyramid);
        assert!(!overlay.is_my_match_turn);
        assert!(!overlay.can_match);
    }

    #[test]
    fn bus_guess_copies_card_and_progress() {
        let reply = ActionReply {
            ok: true,
            new_card: Some(Card::new("J", "♣️")),
            bus_progress: Some(2),
            flavor_text: Some("✅".into()),
            ..Default::default()
        };
        let overlay = apply_optimistic(&OptimisticAction::BusGuess, &base(), Some(&reply)).unwrap();
        assert_eq!(overlay.game.bus_current_card, Some(Card::new("J", "♣️")));
        assert_eq!(overlay.game.bus_progress, 2);

        let no_card = ActionReply::default();
        assert!(apply_optimistic(&OptimisticAction::BusGuess, &base(), Some(&no_card)).is_none());
    }

    #[test]
    fn action_mapping() {
        let game_id = Uuid::from_u128(9);
        assert_eq!(
            OptimisticAction::for_action(&GameAction::Flip { game_id }),
            Some(OptimisticAction::RevealNextCard)
        );
        assert_eq!(
            OptimisticAction::for_action(&GameAction::BusGuess {
                game_id,
                guess: GuessDirection::Lower
            }),
            Some(OptimisticAction::BusGuess)
        );
        assert!(OptimisticAction::for_action(&GameAction::Start { game_id }).is_none());
        assert!(OptimisticAction::RevealNextCard.needs_reply());
        assert!(!OptimisticAction::PassTurn.needs_reply());
    }
}
