//! Log cursor and toast translation.
//!
//! The service appends to a per-game action log. [`NotificationTranslator`]
//! turns each new snapshot's log into at most one [`Toast`], using a
//! [`LogCursor`] high-water mark so an entry is never surfaced twice.
//! [`ToastSlot`] holds the single visible toast and its expiry.

use std::time::Duration;

use tokio::time::Instant;

use crate::protocol::{LogEntry, Snapshot, Timestamp};

/// Category of a log entry, decoded from its `action_type` tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogCategory {
    Flip,
    Match,
    Pass,
    BusGuess,
    BusStart,
    BusEnd,
    GameEnd,
    /// Tag this client does not know. Kept for history, never notified.
    Other(String),
}

impl LogCategory {
    /// Decode an `action_type` tag.
    pub fn parse(tag: &str) -> Self {
        match tag {
            "flip" => Self::Flip,
            "match" => Self::Match,
            "pass" => Self::Pass,
            "bus_guess" => Self::BusGuess,
            "bus_start" => Self::BusStart,
            "bus_end" | "bus_exit" => Self::BusEnd,
            "game_end" | "game_over" => Self::GameEnd,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns `true` for categories eligible to become a toast.
    pub fn is_notifiable(&self) -> bool {
        matches!(
            self,
            Self::Match | Self::BusGuess | Self::BusStart | Self::BusEnd | Self::GameEnd
        )
    }
}

/// Cosmetic class of a toast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Match,
    BusGuessCorrect,
    BusGuessIncorrect,
    BusPhaseStart,
    BusPhaseExit,
    GameEnd,
}

/// A transient notification derived from one log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    /// Timestamp of the source entry. Identical keys mean the same toast,
    /// so re-renders must not restart its animation.
    pub key: Timestamp,
    pub kind: ToastKind,
    pub text: String,
}

impl Toast {
    /// Build a toast from a log entry, or `None` if its category is not notifiable.
    pub fn from_entry(entry: &LogEntry) -> Option<Self> {
        let text = entry
            .flavor_text
            .as_deref()
            .filter(|text| !text.is_empty())
            .unwrap_or(entry.action_type.as_str());

        let kind = match LogCategory::parse(&entry.action_type) {
            LogCategory::Match => ToastKind::Match,
            LogCategory::BusGuess if is_correct_guess(text) => ToastKind::BusGuessCorrect,
            LogCategory::BusGuess => ToastKind::BusGuessIncorrect,
            LogCategory::BusStart => ToastKind::BusPhaseStart,
            LogCategory::BusEnd => ToastKind::BusPhaseExit,
            LogCategory::GameEnd => ToastKind::GameEnd,
            LogCategory::Flip | LogCategory::Pass | LogCategory::Other(_) => return None,
        };

        Some(Self {
            key: entry.created_at,
            kind,
            text: text.to_string(),
        })
    }
}

/// Classify bus-guess text by its marker. Unmarked text counts as a miss.
fn is_correct_guess(text: &str) -> bool {
    if text.contains('✅') {
        return true;
    }
    if text.contains('❌') {
        return false;
    }
    let lower = text.to_lowercase();
    // "incorrect" and "nije pogodio" contain the positive words, check misses first.
    const MISS: [&str; 5] = ["incorrect", "wrong", "nije pogod", "promas", "promaš"];
    const HIT: [&str; 3] = ["correct", "pogod", "tačno"];
    if MISS.iter().any(|word| lower.contains(word)) {
        return false;
    }
    HIT.iter().any(|word| lower.contains(word))
}

/// High-water mark over the action log of the active game.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogCursor {
    mark: Timestamp,
}

impl LogCursor {
    /// Timestamp of the newest entry already processed.
    pub fn mark(&self) -> Timestamp {
        self.mark
    }

    /// Move the mark forward. Never moves it backwards.
    pub fn advance_to(&mut self, timestamp: Timestamp) {
        self.mark = self.mark.max(timestamp);
    }

    /// Forget everything. Called when the active game changes.
    pub fn reset(&mut self) {
        self.mark = 0;
    }
}

/// Turns snapshots into at most one toast each.
#[derive(Debug, Clone, Default)]
pub struct NotificationTranslator {
    cursor: LogCursor,
}

impl NotificationTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current high-water mark.
    pub fn mark(&self) -> Timestamp {
        self.cursor.mark()
    }

    /// Reset the cursor for a new game.
    pub fn reset(&mut self) {
        self.cursor.reset();
    }

    /// Process the log of a freshly applied snapshot.
    ///
    /// Returns the most recent notifiable entry newer than the mark, if any.
    /// The mark always advances to the newest log timestamp, whether or not a
    /// toast was produced.
    pub fn observe(&mut self, snapshot: &Snapshot) -> Option<Toast> {
        let newest = snapshot.newest_log_timestamp();
        let mark = self.cursor.mark();
        if newest <= mark {
            return None;
        }

        let mut entries: Vec<&LogEntry> = snapshot.recent_log.iter().collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let toast = entries
            .into_iter()
            .take_while(|entry| entry.created_at > mark)
            .find_map(Toast::from_entry);

        self.cursor.advance_to(newest);
        tracing::debug!(mark, newest, toast = ?toast.as_ref().map(|t| t.key), "log cursor advanced");
        toast
    }
}

/// Longest a toast may stay visible.
pub const MAX_TOAST_LIFETIME: Duration = Duration::from_secs(60 * 60);

/// Holds the single visible toast until it expires or is replaced.
#[derive(Debug)]
pub struct ToastSlot {
    lifetime: Duration,
    current: Option<(Toast, Instant)>,
}

impl ToastSlot {
    /// Create an empty slot whose toasts live for `lifetime`, capped at
    /// [`MAX_TOAST_LIFETIME`].
    pub fn new(lifetime: Duration) -> Self {
        Self {
            lifetime: lifetime.min(MAX_TOAST_LIFETIME),
            current: None,
        }
    }

    /// Show `toast`, replacing any toast still visible. Returns the replaced toast.
    pub fn show(&mut self, toast: Toast, now: Instant) -> Option<Toast> {
        let deadline = now.checked_add(self.lifetime).unwrap_or(now);
        self.current
            .replace((toast, deadline))
            .map(|(previous, _)| previous)
    }

    /// The visible toast, if any.
    pub fn current(&self) -> Option<&Toast> {
        self.current.as_ref().map(|(toast, _)| toast)
    }

    /// When the visible toast expires.
    pub fn deadline(&self) -> Option<Instant> {
        self.current.as_ref().map(|(_, deadline)| *deadline)
    }

    /// Clear the toast if its lifetime has elapsed at `now`. Returns the cleared toast.
    pub fn expire(&mut self, now: Instant) -> Option<Toast> {
        if self.deadline().is_some_and(|deadline| deadline <= now) {
            self.clear()
        } else {
            None
        }
    }

    /// Drop the visible toast immediately.
    pub fn clear(&mut self) -> Option<Toast> {
        self.current.take().map(|(toast, _)| toast)
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
    use uuid::Uuid;

    fn entry(t: Timestamp, tag: &str, text: &str) -> LogEntry {
        LogEntry {
            action_type: tag.into(),
            flavor_text: Some(text.into()),
            created_at: t,
        }
    }

    fn snapshot(log: Vec<LogEntry>) -> Snapshot {
        let json = serde_json::json!({
            "game": { "id": Uuid::from_u128(1), "status": "active", "current_phase": "pyramid" }
        });
        let mut snapshot: Snapshot = serde_json::from_value(json).unwrap();
        snapshot.recent_log = log;
        snapshot
    }

    #[test]
    fn flip_advances_mark_without_toast() {
        let mut translator = NotificationTranslator::new();
        let a = snapshot(vec![entry(100, "flip", "Okrenuta 7♥️")]);
        assert!(translator.observe(&a).is_none());
        assert_eq!(translator.mark(), 100);
    }

    #[test]
    fn documented_scenario_a_b_c() {
        let mut translator = NotificationTranslator::new();

        let a = snapshot(vec![entry(100, "flip", "")]);
        assert!(translator.observe(&a).is_none());
        assert_eq!(translator.mark(), 100);

        let b = snapshot(vec![
            entry(100, "flip", ""),
            entry(150, "match", "P1 gives 2 drinks"),
        ]);
        let toast = translator.observe(&b).unwrap();
        assert_eq!(toast.text, "P1 gives 2 drinks");
        assert_eq!(toast.kind, ToastKind::Match);
        assert_eq!(toast.key, 150);
        assert_eq!(translator.mark(), 150);

        let c = b.clone();
        assert!(translator.observe(&c).is_none());
        assert_eq!(translator.mark(), 150);
    }

    #[test]
    fn many_new_entries_yield_the_most_recent_notifiable_one() {
        let mut translator = NotificationTranslator::new();
        translator.observe(&snapshot(vec![entry(10, "flip", "")]));

        // Newest-first wire order, with a flip on top.
        let s = snapshot(vec![
            entry(60, "flip", "flip"),
            entry(50, "match", "third"),
            entry(40, "match", "second"),
            entry(30, "bus_start", "first"),
            entry(10, "flip", ""),
        ]);
        let toast = translator.observe(&s).unwrap();
        assert_eq!(toast.text, "third");
        assert_eq!(translator.mark(), 60);
    }

    #[test]
    fn entries_at_or_below_mark_never_toast() {
        let mut translator = NotificationTranslator::new();
        translator.observe(&snapshot(vec![entry(200, "match", "old")]));

        // A newer flip arrives together with an old match that was already seen.
        let s = snapshot(vec![entry(200, "match", "old"), entry(250, "flip", "")]);
        assert!(translator.observe(&s).is_none());
        assert_eq!(translator.mark(), 250);
    }

    #[test]
    fn stale_snapshot_does_not_move_mark_back() {
        let mut translator = NotificationTranslator::new();
        translator.observe(&snapshot(vec![entry(300, "flip", "")]));
        assert!(translator
            .observe(&snapshot(vec![entry(200, "match", "late")]))
            .is_none());
        assert_eq!(translator.mark(), 300);
    }

    #[test]
    fn reset_starts_over() {
        let mut translator = NotificationTranslator::new();
        translator.observe(&snapshot(vec![entry(300, "game_end", "Kraj")]));
        translator.reset();
        assert_eq!(translator.mark(), 0);
        let toast = translator
            .observe(&snapshot(vec![entry(5, "game_end", "Kraj")]))
            .unwrap();
        assert_eq!(toast.kind, ToastKind::GameEnd);
    }

    #[test]
    fn bus_guess_classification() {
        let hit = Toast::from_entry(&entry(1, "bus_guess", "✅ Ana pogodila")).unwrap();
        assert_eq!(hit.kind, ToastKind::BusGuessCorrect);
        let miss = Toast::from_entry(&entry(2, "bus_guess", "❌ Promasaj, 3 cuga")).unwrap();
        assert_eq!(miss.kind, ToastKind::BusGuessIncorrect);
        let words = Toast::from_entry(&entry(3, "bus_guess", "Bojan nije pogodio")).unwrap();
        assert_eq!(words.kind, ToastKind::BusGuessIncorrect);
        let plain = Toast::from_entry(&entry(4, "bus_guess", "Correct guess")).unwrap();
        assert_eq!(plain.kind, ToastKind::BusGuessCorrect);
        let unmarked = Toast::from_entry(&entry(5, "bus_guess", "Bojan")).unwrap();
        assert_eq!(unmarked.kind, ToastKind::BusGuessIncorrect);
    }

    #[test]
    fn category_parsing() {
        assert_eq!(LogCategory::parse("bus_exit"), LogCategory::BusEnd);
        assert!(LogCategory::parse("game_end").is_notifiable());
        assert!(!LogCategory::parse("pass").is_notifiable());
        assert_eq!(
            LogCategory::parse("joined"),
            LogCategory::Other("joined".into())
        );
        assert!(!LogCategory::parse("joined").is_notifiable());
    }

    #[test]
    fn toast_text_falls_back_to_tag() {
        let toast = Toast::from_entry(&LogEntry {
            action_type: "bus_start".into(),
            flavor_text: None,
            created_at: 9,
        })
        .unwrap();
        assert_eq!(toast.text, "bus_start");
        assert_eq!(toast.kind, ToastKind::BusPhaseStart);
    }

    #[test]
    fn slot_preempts_and_expires() {
        let mut slot = ToastSlot::new(Duration::from_secs(4));
        let now = Instant::now();
        let first = Toast {
            key: 1,
            kind: ToastKind::Match,
            text: "a".into(),
        };
        let second = Toast {
            key: 2,
            kind: ToastKind::GameEnd,
            text: "b".into(),
        };

        assert!(slot.show(first.clone(), now).is_none());
        assert_eq!(slot.show(second.clone(), now + Duration::from_secs(1)), Some(first));
        assert_eq!(slot.current(), Some(&second));

        assert!(slot.expire(now + Duration::from_secs(4)).is_none());
        assert_eq!(slot.deadline(), Some(now + Duration::from_secs(5)));
        assert_eq!(slot.expire(now + Duration::from_secs(5)), Some(second));
        assert!(slot.current().is_none());
        assert!(slot.clear().is_none());
    }

    #[test]
    fn unbounded_lifetime_is_capped() {
        let mut slot = ToastSlot::new(Duration::MAX);
        let now = Instant::now();
        let toast = Toast {
            key: 1,
            kind: ToastKind::Match,
            text: "a".into(),
        };
        assert!(slot.show(toast.clone(), now).is_none());
        assert_eq!(slot.deadline(), Some(now + MAX_TOAST_LIFETIME));
        assert!(slot.expire(now + Duration::from_secs(60)).is_none());
        assert_eq!(slot.expire(now + MAX_TOAST_LIFETIME), Some(toast));
    }
}
