//! The sync engine: one background task that owns all game state.
//!
//! [`SyncClient`] is a thin handle that talks to the engine task over an
//! unbounded command channel. The task multiplexes user commands, poll
//! ticks, push events and toast expiry via `tokio::select!`, so every state
//! mutation happens on a single owner in arrival order. Events go out on a
//! bounded channel returned from [`SyncClient::start`]; the render state is
//! published on a [`watch`] channel.
//!
//! # Example
//!
//! ```rust,ignore
//! let adapter = PullAdapter::new(PullConfig::new("https://example.invalid", init_data))?;
//! let host = LoggingHost::new(Viewer::new(42, "Ana"));
//! let (client, mut events) = SyncClient::start(adapter, host, SyncConfig::new());
//!
//! client.open_game(game_id).await?;
//! client.flip().await?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SyncEvent::Toast(toast) => println!("{}", toast.text),
//!         SyncEvent::Stopped => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::adapter::{ConnectionState, LobbyNotice, PushEvent, SyncTransport, TransportKind};
use crate::error::{Result, SyncError};
use crate::event::{Screen, SyncEvent, ViewState};
use crate::host::Host;
use crate::notify::MAX_TOAST_LIFETIME;
use crate::protocol::{
    ActionKind, ActionReply, Card, GameAction, GameId, GuessDirection, LobbyListing, PlayerId,
    Snapshot, GENERIC_FAILURE_MESSAGE,
};
use crate::scheduler::{PollIntervals, PollScheduler, PollTick};
use crate::session::GameSession;
use crate::store::ApplyOutcome;

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default toast lifetime.
const DEFAULT_TOAST_LIFETIME: Duration = Duration::from_secs(4);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`SyncClient`].
///
/// # Example
///
/// ```
/// use autobus_sync::{PollIntervals, SyncConfig};
/// use std::time::Duration;
///
/// let config = SyncConfig::new()
///     .with_poll_intervals(PollIntervals::new().with_bus(Duration::from_millis(250)))
///     .with_toast_lifetime(Duration::from_secs(3));
/// assert!(config.fallback_message.is_none());
/// ```
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Poll cadence for pull transports.
    pub poll_intervals: PollIntervals,
    /// How long a toast stays visible. Defaults to **4 seconds**, capped at
    /// [`MAX_TOAST_LIFETIME`].
    pub toast_lifetime: Duration,
    /// Alert text for every failure without a server message.
    ///
    /// Defaults to `None`: each action then alerts its own text from
    /// [`ActionKind::fallback_message`].
    pub fallback_message: Option<String>,
    /// Capacity of the bounded event channel.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Time given to the engine task to close the transport on shutdown
    /// before it is aborted. Defaults to **1 second**.
    pub shutdown_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self {
            poll_intervals: PollIntervals::new(),
            toast_lifetime: DEFAULT_TOAST_LIFETIME,
            fallback_message: None,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_poll_intervals(mut self, intervals: PollIntervals) -> Self {
        self.poll_intervals = intervals;
        self
    }

    /// Set the toast lifetime. Values above [`MAX_TOAST_LIFETIME`] are clamped.
    #[must_use]
    pub fn with_toast_lifetime(mut self, lifetime: Duration) -> Self {
        self.toast_lifetime = lifetime.min(MAX_TOAST_LIFETIME);
        self
    }

    #[must_use]
    pub fn with_fallback_message(mut self, message: impl Into<String>) -> Self {
        self.fallback_message = Some(message.into());
        self
    }

    /// Set the capacity of the bounded event channel. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

// ── Commands ────────────────────────────────────────────────────────

/// An action issued from the open game view. The engine fills in the game id.
#[derive(Debug, Clone)]
enum Play {
    Flip,
    Match { card: Card, target: PlayerId },
    Pass,
    BusGuess(GuessDirection),
}

impl Play {
    fn into_action(self, game_id: GameId) -> GameAction {
        match self {
            Self::Flip => GameAction::Flip { game_id },
            Self::Match { card, target } => GameAction::Match {
                game_id,
                card,
                target_user_id: target,
            },
            Self::Pass => GameAction::Pass { game_id },
            Self::BusGuess(guess) => GameAction::BusGuess { game_id, guess },
        }
    }
}

#[derive(Debug)]
enum Intent {
    Lobby(GameAction),
    InGame(Play),
}

enum Command {
    ShowLobby {
        reply: oneshot::Sender<Result<()>>,
    },
    OpenGame {
        game_id: GameId,
        reply: oneshot::Sender<Result<()>>,
    },
    Refresh {
        reply: oneshot::Sender<Result<()>>,
    },
    Act {
        intent: Intent,
        reply: oneshot::Sender<Result<ActionReply>>,
    },
}

// ── Shared state ────────────────────────────────────────────────────

/// Flags shared between the handle and the engine task.
struct Shared {
    running: AtomicBool,
    acting: AtomicBool,
}

// ── Client handle ───────────────────────────────────────────────────

/// Handle to the sync engine.
///
/// Created via [`SyncClient::start`], which spawns the engine task and
/// returns this handle together with an event receiver. Methods queue a
/// command and await its outcome; they never touch state directly.
pub struct SyncClient {
    cmd_tx: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
    view_rx: watch::Receiver<ViewState>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl SyncClient {
    /// Start the engine task and return a handle plus event receiver.
    ///
    /// The engine starts on the lobby screen and fetches the lobby listing
    /// immediately. The first event is always [`SyncEvent::Started`].
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start(
        mut transport: impl SyncTransport,
        host: impl Host,
        config: SyncConfig,
    ) -> (Self, mpsc::Receiver<SyncEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (view_tx, view_rx) = watch::channel(ViewState::default());

        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            acting: AtomicBool::new(false),
        });

        let push_rx = transport.take_push_events();
        let (scheduler, tick_rx) = PollScheduler::new(transport.kind(), config.poll_intervals);
        let connection = transport.connection_state();
        let engine = Engine {
            transport,
            host: Arc::new(host),
            fallback_message: config.fallback_message,
            session: GameSession::new(config.toast_lifetime),
            scheduler,
            screen: Screen::Lobby,
            lobby: None,
            connection,
            event_tx,
            view_tx,
            shared: Arc::clone(&shared),
        };

        let task = tokio::spawn(engine_loop(engine, cmd_rx, tick_rx, push_rx, shutdown_rx));

        let client = Self {
            cmd_tx,
            shared,
            view_rx,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        };
        (client, event_rx)
    }

    // ── Navigation ──────────────────────────────────────────────────

    /// Switch to the lobby screen and fetch the listing.
    ///
    /// # Errors
    ///
    /// Returns the fetch error if the listing could not be read. The screen
    /// switch happens regardless.
    pub async fn show_lobby(&self) -> Result<()> {
        self.request(|reply| Command::ShowLobby { reply }).await
    }

    /// Open `game_id` and fetch its snapshot.
    ///
    /// # Errors
    ///
    /// Returns the fetch error if the snapshot could not be read. The game
    /// stays open and polling picks it up later.
    pub async fn open_game(&self, game_id: GameId) -> Result<()> {
        self.request(|reply| Command::OpenGame { game_id, reply })
            .await
    }

    /// Refetch whatever is on screen.
    pub async fn refresh(&self) -> Result<()> {
        self.request(|reply| Command::Refresh { reply }).await
    }

    // ── Lobby actions ───────────────────────────────────────────────

    /// Create a new game. The reply carries its id.
    pub async fn create_game(&self) -> Result<ActionReply> {
        self.act(Intent::Lobby(GameAction::Create)).await
    }

    pub async fn join_game(&self, game_id: GameId) -> Result<ActionReply> {
        self.act(Intent::Lobby(GameAction::Join { game_id })).await
    }

    /// Start a game and open it.
    pub async fn start_game(&self, game_id: GameId) -> Result<ActionReply> {
        self.act(Intent::Lobby(GameAction::Start { game_id })).await
    }

    /// Leave a game. Leaving the open game returns to the lobby.
    pub async fn leave_game(&self, game_id: GameId) -> Result<ActionReply> {
        self.act(Intent::Lobby(GameAction::Leave { game_id })).await
    }

    // ── In-game actions ─────────────────────────────────────────────

    /// Reveal the next pyramid card.
    ///
    /// # Errors
    ///
    /// - [`SyncError::ActionInFlight`] if another action is pending.
    /// - [`SyncError::NoActiveGame`] if no game is open.
    /// - [`SyncError::NotConnected`] if the transport is not ready.
    /// - [`SyncError::ActionRejected`] if the service refused.
    pub async fn flip(&self) -> Result<ActionReply> {
        self.act(Intent::InGame(Play::Flip)).await
    }

    /// Play `card` against the revealed card, giving drinks to `target`.
    pub async fn submit_match(&self, card: Card, target: PlayerId) -> Result<ActionReply> {
        self.act(Intent::InGame(Play::Match { card, target })).await
    }

    pub async fn pass_turn(&self) -> Result<ActionReply> {
        self.act(Intent::InGame(Play::Pass)).await
    }

    pub async fn bus_guess(&self, guess: GuessDirection) -> Result<ActionReply> {
        self.act(Intent::InGame(Play::BusGuess(guess))).await
    }

    // ── State accessors ─────────────────────────────────────────────

    /// Current render state.
    pub fn view(&self) -> ViewState {
        self.view_rx.borrow().clone()
    }

    /// Watch the render state.
    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.view_rx.clone()
    }

    /// Returns `true` until the engine task stops.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Returns `true` while an action awaits its result.
    pub fn is_acting(&self) -> bool {
        self.shared.acting.load(Ordering::Acquire)
    }

    /// Stop the engine, close the transport and end the event stream.
    pub async fn shutdown(&mut self) {
        debug!("SyncClient: shutdown requested");
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("engine task terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("engine task did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("engine task aborted: {join_err}");
                    }
                }
            }
        }

        self.shared.running.store(false, Ordering::Release);
    }

    // ── Internal helpers ────────────────────────────────────────────

    async fn request(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<()>>) -> Command,
    ) -> Result<()> {
        if !self.is_running() {
            return Err(SyncError::NotConnected);
        }
        let (reply, result) = oneshot::channel();
        self.cmd_tx
            .send(command(reply))
            .map_err(|_| SyncError::NotConnected)?;
        result.await.unwrap_or(Err(SyncError::NotConnected))
    }

    /// Queue an action, enforcing one in flight at a time.
    async fn act(&self, intent: Intent) -> Result<ActionReply> {
        if !self.is_running() {
            return Err(SyncError::NotConnected);
        }
        if self
            .shared
            .acting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SyncError::ActionInFlight);
        }
        let (reply, result) = oneshot::channel();
        if self.cmd_tx.send(Command::Act { intent, reply }).is_err() {
            self.shared.acting.store(false, Ordering::Release);
            return Err(SyncError::NotConnected);
        }
        result.await.unwrap_or(Err(SyncError::NotConnected))
    }
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("running", &self.is_running())
            .field("acting", &self.is_acting())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        // No executor to drive a graceful close from `Drop`; abort instead.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Engine task ─────────────────────────────────────────────────────

struct Engine<T> {
    transport: T,
    host: Arc<dyn Host>,
    fallback_message: Option<String>,
    session: GameSession,
    scheduler: PollScheduler,
    screen: Screen,
    lobby: Option<Arc<LobbyListing>>,
    connection: ConnectionState,
    event_tx: mpsc::Sender<SyncEvent>,
    view_tx: watch::Sender<ViewState>,
    shared: Arc<Shared>,
}

/// Background loop. Exits on shutdown or when the handle is dropped.
async fn engine_loop<T: SyncTransport>(
    mut engine: Engine<T>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    mut tick_rx: mpsc::Receiver<PollTick>,
    mut push_rx: Option<mpsc::Receiver<PushEvent>>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let viewer = engine.host.viewer();
    debug!(viewer = viewer.id, name = %viewer.display_name, "engine loop started");
    engine.emit(SyncEvent::Started {
        transport: engine.transport.kind(),
    });
    engine.scheduler.start_lobby();
    engine.publish();
    // A push transport that is not up yet triggers the fetch once it is ready.
    if engine.transport.is_ready() {
        let _ = engine.refresh_lobby().await;
    }

    loop {
        let toast_deadline = engine.session.toast_deadline();
        tokio::select! {
            _ = &mut shutdown_rx => {
                debug!("shutdown signal received");
                break;
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(cmd) => engine.handle(cmd).await,
                    None => {
                        debug!("command channel closed, shutting down engine loop");
                        break;
                    }
                }
            }

            Some(tick) = tick_rx.recv() => engine.on_tick(tick).await,

            event = next_push_event(&mut push_rx) => engine.on_push(event).await,

            () = sleep_until(toast_deadline) => engine.expire_toast(),
        }
    }

    engine.scheduler.stop();
    if let Err(e) = engine.transport.close().await {
        debug!("transport close failed: {e}");
    }
    engine.shared.running.store(false, Ordering::Release);
    engine.shared.acting.store(false, Ordering::Release);
    engine.publish();
    // Always delivered, and always last.
    if engine.event_tx.send(SyncEvent::Stopped).await.is_err() {
        debug!("event channel closed, receiver dropped");
    }
    debug!("engine loop exited");
}

impl<T: SyncTransport> Engine<T> {
    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::ShowLobby { reply } => {
                let result = self.enter_lobby().await;
                let _ = reply.send(result);
            }
            Command::OpenGame { game_id, reply } => {
                let result = self.enter_game(game_id).await;
                let _ = reply.send(result);
            }
            Command::Refresh { reply } => {
                let result = self.refresh().await;
                let _ = reply.send(result);
            }
            Command::Act { intent, reply } => self.act(intent, reply).await,
        }
    }

    // ── Screens and reads ───────────────────────────────────────────

    async fn enter_lobby(&mut self) -> Result<()> {
        self.scheduler.stop_game();
        self.session.close_game();
        if self.screen != Screen::Lobby {
            self.screen = Screen::Lobby;
            self.emit(SyncEvent::ScreenChanged(Screen::Lobby));
        }
        self.scheduler.start_lobby();
        self.publish();
        self.refresh_lobby().await
    }

    async fn enter_game(&mut self, game_id: GameId) -> Result<()> {
        self.scheduler.stop_lobby();
        if self.screen != Screen::Game(game_id) {
            self.scheduler.stop_game();
            self.session.open_game(game_id);
            self.screen = Screen::Game(game_id);
            self.emit(SyncEvent::ScreenChanged(self.screen));
            self.publish();
        }
        self.refresh_game(game_id).await
    }

    async fn refresh(&mut self) -> Result<()> {
        match self.screen {
            Screen::Lobby => self.refresh_lobby().await,
            Screen::Game(game_id) => self.refresh_game(game_id).await,
        }
    }

    async fn refresh_lobby(&mut self) -> Result<()> {
        match self.transport.fetch_lobby().await {
            Ok(listing) => {
                let listing = Arc::new(listing);
                self.lobby = Some(Arc::clone(&listing));
                self.emit(SyncEvent::LobbyUpdated(listing));
                self.publish();
                Ok(())
            }
            Err(e) => {
                self.report_fetch_failure("lobby", &e);
                Err(e)
            }
        }
    }

    async fn refresh_game(&mut self, game_id: GameId) -> Result<()> {
        match self.transport.fetch_snapshot(game_id).await {
            Ok(snapshot) => {
                self.ingest(snapshot);
                Ok(())
            }
            Err(e) => {
                self.report_fetch_failure("snapshot", &e);
                Err(e)
            }
        }
    }

    fn report_fetch_failure(&self, what: &str, error: &SyncError) {
        warn!("failed to fetch {what}: {error}");
        self.emit(SyncEvent::FetchFailed {
            message: format!("failed to fetch {what}: {error}"),
        });
    }

    /// Offer an authoritative snapshot to the session.
    fn ingest(&mut self, snapshot: Snapshot) {
        let ingested = self.session.ingest(snapshot, Instant::now());
        match ingested.outcome {
            ApplyOutcome::Applied => {
                if let Some(replaced) = ingested.replaced {
                    self.emit(SyncEvent::ToastCleared { key: replaced.key });
                }
                if let Some(toast) = ingested.toast {
                    self.emit(SyncEvent::Toast(toast));
                }
                self.visible_changed();
            }
            ApplyOutcome::Stale { newest, applied } => {
                debug!(newest, applied, "stale snapshot ignored");
            }
            ApplyOutcome::WrongGame | ApplyOutcome::NoActiveGame => {
                debug!(outcome = ?ingested.outcome, "snapshot not for the open game");
            }
        }
    }

    /// Re-evaluate polling for the visible state and publish it.
    fn visible_changed(&mut self) {
        if let Some(visible) = self.session.visible() {
            self.scheduler.update(visible);
            self.emit(SyncEvent::StateUpdated {
                snapshot: Arc::new(visible.clone()),
                optimistic: self.session.is_optimistic(),
            });
        }
        self.publish();
    }

    // ── Actions ─────────────────────────────────────────────────────

    async fn act(&mut self, intent: Intent, reply: oneshot::Sender<Result<ActionReply>>) {
        let action = match intent {
            Intent::Lobby(action) => action,
            Intent::InGame(play) => match self.session.active_game() {
                Some(game_id) => play.into_action(game_id),
                None => {
                    self.release_action_slot();
                    let _ = reply.send(Err(SyncError::NoActiveGame));
                    return;
                }
            },
        };
        let kind = action.kind();

        if !self.transport.is_ready() {
            let error = SyncError::NotConnected;
            self.report_action_failure(kind, &error);
            self.release_action_slot();
            self.publish();
            let _ = reply.send(Err(error));
            return;
        }
        if let Err(error) = self.session.begin_action(&action) {
            self.release_action_slot();
            let _ = reply.send(Err(error));
            return;
        }

        debug!(%kind, "dispatching action");
        if self.session.apply_before_dispatch() {
            self.visible_changed();
        } else {
            self.publish();
        }

        let result = self.transport.send_action(&action).await;
        let changed = self.session.complete_action(&result);
        self.release_action_slot();

        match result {
            Ok(action_reply) => {
                info!(%kind, "action completed");
                self.emit(SyncEvent::ActionCompleted {
                    kind,
                    summary: action_reply.summary(kind),
                    reply: action_reply.clone(),
                });
                if changed {
                    self.visible_changed();
                } else {
                    self.publish();
                }
                let _ = reply.send(Ok(action_reply.clone()));
                self.follow_up(&action, &action_reply).await;
            }
            Err(error) => {
                self.report_action_failure(kind, &error);
                if changed {
                    self.visible_changed();
                } else {
                    self.publish();
                }
                let _ = reply.send(Err(error));
            }
        }
    }

    /// Reads that follow a successful action.
    async fn follow_up(&mut self, action: &GameAction, reply: &ActionReply) {
        let result = match action {
            GameAction::Create | GameAction::Join { .. } if self.screen == Screen::Lobby => {
                self.refresh_lobby().await
            }
            GameAction::Start { game_id } => self.enter_game(*game_id).await,
            GameAction::Leave { game_id } if self.screen == Screen::Game(*game_id) => {
                self.enter_lobby().await
            }
            // Pull transports confirm in-game actions with a fresh read;
            // push transports get the snapshot from the service.
            _ if action.is_in_game() && self.transport.kind() == TransportKind::Pull => {
                match self.screen {
                    Screen::Game(game_id) => self.refresh_game(game_id).await,
                    Screen::Lobby => Ok(()),
                }
            }
            _ => Ok(()),
        };
        if let Err(e) = result {
            debug!(kind = %action.kind(), game = ?reply.game_id, "follow-up read failed: {e}");
        }
    }

    fn report_action_failure(&self, kind: ActionKind, error: &SyncError) {
        let fallback = match (&self.fallback_message, error) {
            (Some(message), _) => message.as_str(),
            // The service answered but gave no reason.
            (None, SyncError::ActionRejected { .. }) => GENERIC_FAILURE_MESSAGE,
            (None, _) => kind.fallback_message(),
        };
        let message = error.user_message(fallback);
        warn!(%kind, "action failed: {error}");
        self.host.alert(message);
        self.emit(SyncEvent::ActionFailed {
            kind,
            message: message.to_string(),
        });
    }

    fn release_action_slot(&self) {
        self.shared.acting.store(false, Ordering::Release);
    }

    // ── Ticks, push events, toasts ──────────────────────────────────

    async fn on_tick(&mut self, tick: PollTick) {
        match tick {
            PollTick::Game(game_id) => {
                // Ticks queued before the ticker was stopped are dropped here.
                if self.screen == Screen::Game(game_id) && self.scheduler.is_polling(game_id) {
                    let _ = self.refresh_game(game_id).await;
                }
            }
            PollTick::Lobby => {
                if self.screen == Screen::Lobby {
                    let _ = self.refresh_lobby().await;
                }
            }
        }
    }

    async fn on_push(&mut self, event: PushEvent) {
        match event {
            PushEvent::Snapshot(snapshot) => {
                if self.screen == Screen::Game(snapshot.game_id()) {
                    self.ingest(*snapshot);
                } else {
                    debug!(game_id = %snapshot.game_id(), "pushed snapshot for a game not on screen");
                }
            }
            PushEvent::Lobby(notice) => {
                debug!(?notice, "lobby notice");
                if self.screen == Screen::Lobby {
                    let _ = self.refresh_lobby().await;
                } else if let LobbyNotice::GameEnded { game_id } = notice {
                    if self.screen == Screen::Game(game_id) {
                        let _ = self.refresh_game(game_id).await;
                    }
                }
            }
            PushEvent::Connection(state) => self.on_connection(state).await,
            PushEvent::ServerError(message) => {
                warn!("server error: {message}");
            }
        }
    }

    async fn on_connection(&mut self, state: ConnectionState) {
        let was_ready = self.connection.is_ready();
        self.connection = state;
        self.publish();
        self.emit(SyncEvent::Connection(state));
        if let ConnectionState::Exhausted { attempts } = state {
            self.emit(SyncEvent::ReconnectExhausted { attempts });
        }

        // Whatever happened while the channel was down is unknown: resync.
        if state.is_ready() && !was_ready {
            let _ = self.refresh().await;
        }
    }

    fn expire_toast(&mut self) {
        if let Some(toast) = self.session.expire_toast(Instant::now()) {
            self.publish();
            self.emit(SyncEvent::ToastCleared { key: toast.key });
        }
    }

    // ── Output ──────────────────────────────────────────────────────

    /// Publish the render state.
    fn publish(&self) {
        let view = ViewState {
            screen: self.screen,
            snapshot: self.session.visible().map(|s| Arc::new(s.clone())),
            optimistic: self.session.is_optimistic(),
            lobby: self.lobby.clone(),
            toast: self.session.toast().cloned(),
            acting: self.session.is_acting() || self.shared.acting.load(Ordering::Acquire),
            connection: Some(self.connection),
        };
        self.view_tx.send_replace(view);
    }

    /// Emit an event. If the channel is full, log a warning and drop the
    /// event to avoid stalling the engine.
    fn emit(&self, event: SyncEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(
                    "event channel full, dropping event: {:?}",
                    std::mem::discriminant(&dropped)
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("event channel closed, receiver dropped");
            }
        }
    }
}

/// Next push event, or never if there is no (longer a) push stream.
async fn next_push_event(rx: &mut Option<mpsc::Receiver<PushEvent>>) -> PushEvent {
    if let Some(events) = rx.as_mut() {
        if let Some(event) = events.recv().await {
            return event;
        }
        debug!("push event stream ended");
    }
    *rx = None;
    std::future::pending().await
}

fn sleep_until(deadline: Option<Instant>) -> impl Future<Output = ()> {
    async move {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
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
    use uuid::Uuid;

    #[test]
    fn config_defaults() {
        let config = SyncConfig::new();
        assert_eq!(config.toast_lifetime, Duration::from_secs(4));
        assert!(config.fallback_message.is_none());
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(config.poll_intervals, PollIntervals::new());
    }

    #[test]
    fn config_builders() {
        let config = SyncConfig::new()
            .with_event_channel_capacity(0)
            .with_fallback_message("Error")
            .with_toast_lifetime(Duration::from_millis(1500))
            .with_shutdown_timeout(Duration::ZERO);
        let capped = SyncConfig::new().with_toast_lifetime(Duration::MAX);
        assert_eq!(capped.toast_lifetime, MAX_TOAST_LIFETIME);
        assert_eq!(config.event_channel_capacity, 1);
        assert_eq!(config.fallback_message.as_deref(), Some("Error"));
        assert_eq!(config.toast_lifetime, Duration::from_millis(1500));
        assert_eq!(config.shutdown_timeout, Duration::ZERO);
    }

    #[test]
    fn plays_fill_in_the_open_game() {
        let game_id = Uuid::from_u128(11);
        assert_eq!(Play::Flip.into_action(game_id), GameAction::Flip { game_id });
        assert_eq!(
            Play::Match {
                card: Card::new("7", "♣️"),
                target: 3
            }
            .into_action(game_id),
            GameAction::Match {
                game_id,
                card: Card::new("7", "♣️"),
                target_user_id: 3
            }
        );
        assert_eq!(
            Play::BusGuess(GuessDirection::Higher).into_action(game_id),
            GameAction::BusGuess {
                game_id,
                guess: GuessDirection::Higher
            }
        );
    }
}
