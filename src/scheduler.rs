//! Adaptive polling for pull transports.
//!
//! [`poll_decision`] is a pure function of the latest visible snapshot: poll
//! while the game is active and someone else holds the move, stay silent
//! otherwise. [`PollScheduler`] turns decisions into ticker tasks and only
//! restarts a ticker when the decision inputs actually change, so an
//! unchanged snapshot never resets the cadence.
//!
//! Under a push transport the game ticker never runs; the service delivers
//! snapshots on its own.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::adapter::TransportKind;
use crate::protocol::{GameId, Lifecycle, Snapshot};

/// Shortest allowed poll interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Longest allowed poll interval.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(30);

const DEFAULT_PYRAMID_INTERVAL: Duration = Duration::from_millis(1000);
const DEFAULT_BUS_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_LOBBY_INTERVAL: Duration = Duration::from_secs(10);

/// Poll cadence per lifecycle phase. Values are clamped to
/// [`MIN_POLL_INTERVAL`]..=[`MAX_POLL_INTERVAL`] by the builders and again
/// wherever a ticker is scheduled, so a struct literal cannot bypass the range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollIntervals {
    /// While the pyramid is being flipped and matched. Defaults to **1 s**.
    pub pyramid: Duration,
    /// While someone rides the bus. Defaults to **500 ms**.
    pub bus: Duration,
    /// Lobby refresh under pull transports. Defaults to **10 s**.
    pub lobby: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self::new()
    }
}

impl PollIntervals {
    pub fn new() -> Self {
        Self {
            pyramid: DEFAULT_PYRAMID_INTERVAL,
            bus: DEFAULT_BUS_INTERVAL,
            lobby: DEFAULT_LOBBY_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_pyramid(mut self, interval: Duration) -> Self {
        self.pyramid = clamp(interval);
        self
    }

    #[must_use]
    pub fn with_bus(mut self, interval: Duration) -> Self {
        self.bus = clamp(interval);
        self
    }

    #[must_use]
    pub fn with_lobby(mut self, interval: Duration) -> Self {
        self.lobby = clamp(interval);
        self
    }
}

fn clamp(interval: Duration) -> Duration {
    interval.clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL)
}

/// Why the scheduler is not polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleReason {
    /// The game is in the lobby or finished.
    NotActive,
    /// It is the viewer's move; nothing changes until they act.
    ViewerHasPriority,
    /// Snapshots arrive over the push channel.
    PushTransport,
}

/// What the scheduler should do for a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
    Idle(IdleReason),
    Poll(Duration),
}

/// Decide whether to poll while `snapshot` is visible.
pub fn poll_decision(snapshot: &Snapshot, intervals: &PollIntervals) -> PollDecision {
    let interval = match snapshot.lifecycle() {
        Lifecycle::Lobby | Lifecycle::Finished => {
            return PollDecision::Idle(IdleReason::NotActive)
        }
        Lifecycle::Pyramid => intervals.pyramid,
        Lifecycle::Bus => intervals.bus,
    };
    if snapshot.viewer_has_priority() {
        PollDecision::Idle(IdleReason::ViewerHasPriority)
    } else {
        PollDecision::Poll(clamp(interval))
    }
}

/// A ticker fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollTick {
    /// Time to refetch this game's snapshot.
    Game(GameId),
    /// Time to refetch the lobby listing.
    Lobby,
}

/// Inputs a game ticker depends on. The ticker restarts only when they change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PollKey {
    game_id: GameId,
    lifecycle: Lifecycle,
    has_priority: bool,
}

impl PollKey {
    fn of(snapshot: &Snapshot) -> Self {
        Self {
            game_id: snapshot.game_id(),
            lifecycle: snapshot.lifecycle(),
            has_priority: snapshot.viewer_has_priority(),
        }
    }
}

struct Ticker {
    key: Option<PollKey>,
    decision: PollDecision,
    task: Option<JoinHandle<()>>,
}

impl Ticker {
    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Owns the game and lobby ticker tasks.
///
/// Ticks are delivered on the channel returned by [`PollScheduler::new`].
/// The channel holds one tick; ticks that fire while one is still queued
/// are coalesced.
pub struct PollScheduler {
    kind: TransportKind,
    intervals: PollIntervals,
    tick_tx: mpsc::Sender<PollTick>,
    game: Ticker,
    lobby: Option<JoinHandle<()>>,
}

impl PollScheduler {
    /// Create a scheduler for a transport of `kind`. Must be called within a Tokio runtime
    /// before any ticker is started.
    pub fn new(kind: TransportKind, intervals: PollIntervals) -> (Self, mpsc::Receiver<PollTick>) {
        let (tick_tx, tick_rx) = mpsc::channel(1);
        let scheduler = Self {
            kind,
            intervals,
            tick_tx,
            game: Ticker {
                key: None,
                decision: PollDecision::Idle(IdleReason::NotActive),
                task: None,
            },
            lobby: None,
        };
        (scheduler, tick_rx)
    }

    pub fn intervals(&self) -> &PollIntervals {
        &self.intervals
    }

    /// Re-evaluate the game ticker for the newly visible `snapshot`.
    pub fn update(&mut self, snapshot: &Snapshot) -> PollDecision {
        let decision = match self.kind {
            TransportKind::Push => PollDecision::Idle(IdleReason::PushTransport),
            TransportKind::Pull => poll_decision(snapshot, &self.intervals),
        };
        let key = PollKey::of(snapshot);
        if self.game.key == Some(key) && self.game.decision == decision {
            return decision;
        }

        self.game.stop();
        self.game.key = Some(key);
        self.game.decision = decision;
        debug!(game_id = %key.game_id, ?decision, "scheduler: game ticker updated");
        if let PollDecision::Poll(period) = decision {
            self.game.task = Some(spawn_ticker(
                period,
                PollTick::Game(key.game_id),
                self.tick_tx.clone(),
            ));
        }
        decision
    }

    /// Stop polling the game.
    pub fn stop_game(&mut self) {
        self.game.stop();
        self.game.key = None;
        self.game.decision = PollDecision::Idle(IdleReason::NotActive);
    }

    /// Returns `true` while the game ticker runs for `game_id`.
    pub fn is_polling(&self, game_id: GameId) -> bool {
        self.game.task.is_some() && self.game.key.is_some_and(|key| key.game_id == game_id)
    }

    /// Current game decision.
    pub fn decision(&self) -> PollDecision {
        self.game.decision
    }

    /// Start the lobby ticker. A no-op under push transports, where lobby
    /// notices drive refreshes instead.
    pub fn start_lobby(&mut self) {
        if self.kind == TransportKind::Push || self.lobby.is_some() {
            return;
        }
        debug!(interval = ?self.intervals.lobby, "scheduler: lobby ticker started");
        self.lobby = Some(spawn_ticker(
            self.intervals.lobby,
            PollTick::Lobby,
            self.tick_tx.clone(),
        ));
    }

    pub fn stop_lobby(&mut self) {
        if let Some(task) = self.lobby.take() {
            task.abort();
        }
    }

    pub fn is_lobby_running(&self) -> bool {
        self.lobby.is_some()
    }

    /// Stop every ticker.
    pub fn stop(&mut self) {
        self.stop_game();
        self.stop_lobby();
    }
}

impl std::fmt::Debug for PollScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollScheduler")
            .field("kind", &self.kind)
            .field("decision", &self.game.decision)
            .field("lobby", &self.lobby.is_some())
            .finish()
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Fire `tick` every `period`, first after one full period.
fn spawn_ticker(period: Duration, tick: PollTick, tx: mpsc::Sender<PollTick>) -> JoinHandle<()> {
    // `interval_at` panics on a zero period.
    let period = clamp(period);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match tx.try_send(tick) {
                Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            }
        }
    })
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

    fn snapshot(status: &str, phase: &str, my_turn: bool, bus_player: bool) -> Snapshot {
        serde_json::from_value(serde_json::json!({
            "game": { "id": Uuid::from_u128(3), "status": status, "current_phase": phase },
            "is_my_match_turn": my_turn,
            "is_bus_player": bus_player
        }))
        .unwrap()
    }

    #[test]
    fn decisions_follow_lifecycle_and_priority() {
        let intervals = PollIntervals::new();
        assert_eq!(
            poll_decision(&snapshot("active", "pyramid", false, false), &intervals),
            PollDecision::Poll(Duration::from_millis(1000))
        );
        assert_eq!(
            poll_decision(&snapshot("active", "bus", false, false), &intervals),
            PollDecision::Poll(Duration::from_millis(500))
        );
        assert_eq!(
            poll_decision(&snapshot("active", "pyramid", true, false), &intervals),
            PollDecision::Idle(IdleReason::ViewerHasPriority)
        );
        assert_eq!(
            poll_decision(&snapshot("active", "bus", false, true), &intervals),
            PollDecision::Idle(IdleReason::ViewerHasPriority)
        );
        assert_eq!(
            poll_decision(&snapshot("finished", "bus", false, false), &intervals),
            PollDecision::Idle(IdleReason::NotActive)
        );
        assert_eq!(
            poll_decision(&snapshot("lobby", "pyramid", false, false), &intervals),
            PollDecision::Idle(IdleReason::NotActive)
        );
    }

    #[test]
    fn intervals_are_clamped() {
        let intervals = PollIntervals::new()
            .with_bus(Duration::from_millis(1))
            .with_pyramid(Duration::from_secs(600))
            .with_lobby(Duration::from_secs(2));
        assert_eq!(intervals.bus, MIN_POLL_INTERVAL);
        assert_eq!(intervals.pyramid, MAX_POLL_INTERVAL);
        assert_eq!(intervals.lobby, Duration::from_secs(2));
    }

    #[test]
    fn decisions_clamp_unchecked_intervals() {
        let intervals = PollIntervals {
            pyramid: Duration::ZERO,
            bus: Duration::MAX,
            ..PollIntervals::new()
        };
        assert_eq!(
            poll_decision(&snapshot("active", "pyramid", false, false), &intervals),
            PollDecision::Poll(MIN_POLL_INTERVAL)
        );
        assert_eq!(
            poll_decision(&snapshot("active", "bus", false, false), &intervals),
            PollDecision::Poll(MAX_POLL_INTERVAL)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_still_ticks() {
        let intervals = PollIntervals {
            pyramid: Duration::ZERO,
            lobby: Duration::ZERO,
            ..PollIntervals::new()
        };
        let (mut scheduler, mut ticks) = PollScheduler::new(TransportKind::Pull, intervals);
        let game_id = Uuid::from_u128(3);

        let started = Instant::now();
        scheduler.update(&snapshot("active", "pyramid", false, false));
        assert_eq!(ticks.recv().await, Some(PollTick::Game(game_id)));
        assert_eq!(started.elapsed(), MIN_POLL_INTERVAL);

        scheduler.stop_game();
        scheduler.start_lobby();
        assert_eq!(ticks.recv().await, Some(PollTick::Lobby));
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_while_others_act() {
        let (mut scheduler, mut ticks) =
            PollScheduler::new(TransportKind::Pull, PollIntervals::new());
        let game_id = Uuid::from_u128(3);
        scheduler.update(&snapshot("active", "bus", false, false));
        assert!(scheduler.is_polling(game_id));

        let started = Instant::now();
        assert_eq!(ticks.recv().await, Some(PollTick::Game(game_id)));
        assert_eq!(started.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_on_own_turn() {
        let (mut scheduler, mut ticks) =
            PollScheduler::new(TransportKind::Pull, PollIntervals::new());
        scheduler.update(&snapshot("active", "pyramid", true, false));
        assert!(!scheduler.is_polling(Uuid::from_u128(3)));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(ticks.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_key_keeps_cadence() {
        let (mut scheduler, mut ticks) =
            PollScheduler::new(TransportKind::Pull, PollIntervals::new());
        let game_id = Uuid::from_u128(3);
        let started = Instant::now();
        scheduler.update(&snapshot("active", "pyramid", false, false));

        tokio::time::sleep(Duration::from_millis(700)).await;
        // Same inputs: the running ticker is kept, the next tick stays at 1 s.
        scheduler.update(&snapshot("active", "pyramid", false, false));
        assert_eq!(ticks.recv().await, Some(PollTick::Game(game_id)));
        assert_eq!(started.elapsed(), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn push_transport_never_polls_the_game() {
        let (mut scheduler, mut ticks) =
            PollScheduler::new(TransportKind::Push, PollIntervals::new());
        let decision = scheduler.update(&snapshot("active", "bus", false, false));
        assert_eq!(decision, PollDecision::Idle(IdleReason::PushTransport));
        scheduler.start_lobby();
        assert!(!scheduler.is_lobby_running());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(ticks.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn lobby_ticker_and_stop() {
        let (mut scheduler, mut ticks) = PollScheduler::new(
            TransportKind::Pull,
            PollIntervals::new().with_lobby(Duration::from_secs(2)),
        );
        scheduler.start_lobby();
        assert_eq!(ticks.recv().await, Some(PollTick::Lobby));

        scheduler.stop();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(ticks.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn taking_priority_stops_the_ticker() {
        let (mut scheduler, mut ticks) =
            PollScheduler::new(TransportKind::Pull, PollIntervals::new());
        scheduler.update(&snapshot("active", "pyramid", false, false));
        scheduler.update(&snapshot("active", "pyramid", true, false));
        assert_eq!(
            scheduler.decision(),
            PollDecision::Idle(IdleReason::ViewerHasPriority)
        );
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(ticks.try_recv().is_err());
    }
}
