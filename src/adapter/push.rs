//! Push transport: persistent connection with handshake, correlated calls
//! and automatic reconnect.
//!
//! [`PushAdapter`] is a thin handle over a background connection loop, the
//! same split the rest of the crate uses. The loop dials through a
//! [`Connector`], sends the `identify` handshake and multiplexes outgoing
//! calls with incoming server messages via `tokio::select!`. Replies are
//! matched to callers by `request_id`. Unsolicited snapshots and lobby
//! notices are forwarded as [`PushEvent`]s.
//!
//! When the connection drops every pending call fails with
//! [`SyncError::TransportClosed`], and the loop redials after
//! [`PushConfig::reconnect_delay`] until
//! [`PushConfig::max_reconnect_attempts`] consecutive attempts have failed.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{ConnectionState, LobbyNotice, PushEvent, SyncTransport, TransportKind};
use crate::error::{Result, SyncError};
use crate::host::{Host, Viewer};
use crate::protocol::{
    ActionReply, CallOutcome, ClientMessage, GameAction, GameId, LobbyListing, RemoteCall,
    ServerMessage, Snapshot,
};
use crate::transport::{Connector, Transport};

const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`PushAdapter`].
///
/// # Example
///
/// ```
/// use autobus_sync::PushConfig;
/// use std::time::Duration;
///
/// let config = PushConfig::new()
///     .with_max_reconnect_attempts(3)
///     .with_reconnect_delay(Duration::from_millis(500));
/// assert_eq!(config.max_reconnect_attempts, 3);
/// ```
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// Consecutive failed reconnect attempts before giving up.
    ///
    /// Defaults to **5**. Zero gives up on the first drop.
    pub max_reconnect_attempts: u32,
    /// Wait between reconnect attempts. Defaults to **2 seconds**.
    pub reconnect_delay: Duration,
    /// How long a call waits for its result. Defaults to **10 seconds**.
    pub call_timeout: Duration,
    /// Capacity of the bounded push event channel.
    ///
    /// Events are dropped with a warning when the consumer falls behind.
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Time given to the connection loop to close cleanly on shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PushConfig {
    pub fn new() -> Self {
        Self {
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set the capacity of the push event channel. Values below 1 are clamped to 1.
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

// ── Handle ──────────────────────────────────────────────────────────

type CallReply = oneshot::Sender<Result<serde_json::Value>>;

enum Command {
    Call {
        request_id: u64,
        call: RemoteCall,
        reply: CallReply,
    },
    /// The caller gave up waiting; forget the pending entry.
    Cancel { request_id: u64 },
}

/// Socket-backed [`SyncTransport`].
///
/// Must be started from within a Tokio runtime.
pub struct PushAdapter {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    events_rx: Option<mpsc::Receiver<PushEvent>>,
    next_request_id: AtomicU64,
    call_timeout: Duration,
    shutdown_timeout: Duration,
    task: Option<JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl PushAdapter {
    /// Spawn the connection loop and return the adapter handle.
    ///
    /// The `identify` handshake announces `host.viewer()`, the same host the
    /// engine is later started with. The first connection attempt starts
    /// immediately. The adapter becomes ready once the server acknowledges
    /// the handshake.
    pub fn start(connector: impl Connector, host: &impl Host, config: PushConfig) -> Self {
        let viewer = host.viewer();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, events_rx) = mpsc::channel(config.event_channel_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let link = Link { state_tx, event_tx };
        let task = tokio::spawn(connection_loop(
            connector,
            LoopSettings {
                viewer,
                max_reconnect_attempts: config.max_reconnect_attempts,
                reconnect_delay: config.reconnect_delay,
            },
            cmd_rx,
            link,
            shutdown_rx,
        ));

        Self {
            cmd_tx,
            state_rx,
            events_rx: Some(events_rx),
            next_request_id: AtomicU64::new(1),
            call_timeout: config.call_timeout,
            shutdown_timeout: config.shutdown_timeout,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch the connection state.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Issue a correlated call and wait for its result.
    async fn call(&self, call: RemoteCall) -> Result<serde_json::Value> {
        match self.state() {
            ConnectionState::Ready => {}
            ConnectionState::Exhausted { attempts } => {
                return Err(SyncError::ReconnectExhausted { attempts });
            }
            _ => return Err(SyncError::NotConnected),
        }
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (reply, result_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Call {
                request_id,
                call,
                reply,
            })
            .map_err(|_| SyncError::NotConnected)?;

        match tokio::time::timeout(self.call_timeout, result_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SyncError::TransportClosed),
            Err(_) => {
                debug!(request_id, "push: call timed out");
                let _ = self.cmd_tx.send(Command::Cancel { request_id });
                Err(SyncError::Timeout)
            }
        }
    }

    /// Close the connection and stop the background loop.
    pub async fn shutdown(&mut self) {
        debug!("PushAdapter: shutdown requested");
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("connection loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("connection loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("connection loop aborted: {join_err}");
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for PushAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushAdapter")
            .field("state", &self.state())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for PushAdapter {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[async_trait]
impl SyncTransport for PushAdapter {
    fn kind(&self) -> TransportKind {
        TransportKind::Push
    }

    fn connection_state(&self) -> ConnectionState {
        self.state()
    }

    async fn fetch_snapshot(&self, game_id: GameId) -> Result<Snapshot> {
        let value = self.call(RemoteCall::FetchState { game_id }).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn fetch_lobby(&self) -> Result<LobbyListing> {
        let value = self.call(RemoteCall::FetchLobby).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn send_action(&self, action: &GameAction) -> Result<ActionReply> {
        let value = self.call(RemoteCall::Action(action.clone())).await?;
        Ok(serde_json::from_value(value)?)
    }

    fn take_push_events(&mut self) -> Option<mpsc::Receiver<PushEvent>> {
        self.events_rx.take()
    }

    async fn close(&mut self) -> Result<()> {
        self.shutdown().await;
        Ok(())
    }
}

// ── Connection loop ─────────────────────────────────────────────────

struct LoopSettings {
    viewer: Viewer,
    max_reconnect_attempts: u32,
    reconnect_delay: Duration,
}

/// Outbound side of the loop: state watch plus event channel.
struct Link {
    state_tx: watch::Sender<ConnectionState>,
    event_tx: mpsc::Sender<PushEvent>,
}

impl Link {
    fn set_state(&self, state: ConnectionState) {
        debug!(?state, "push: connection state");
        self.state_tx.send_replace(state);
        self.emit(PushEvent::Connection(state));
    }

    /// Forward an event. If the channel is full the event is dropped with a
    /// warning so the loop never blocks on a slow consumer.
    fn emit(&self, event: PushEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(
                    "push event channel full, dropping event: {:?}",
                    std::mem::discriminant(&dropped)
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("push event channel closed, receiver dropped");
            }
        }
    }
}

/// Why a connected session ended.
enum SessionEnd {
    Shutdown,
    HandleDropped,
    Lost { reason: String, was_ready: bool },
}

/// Outcome of waiting on a future while no session is up.
enum Waited<T> {
    Done(T),
    Shutdown,
    HandleDropped,
}

type Pending = HashMap<u64, CallReply>;

async fn connection_loop(
    connector: impl Connector,
    settings: LoopSettings,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    link: Link,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    debug!("connection loop started");
    let mut failures: u32 = 0;
    let mut pending = Pending::new();

    link.set_state(ConnectionState::Connecting);
    loop {
        let connected =
            match wait_or_reject(connector.connect(), &mut cmd_rx, &mut shutdown_rx).await {
                Waited::Done(result) => result,
                Waited::Shutdown | Waited::HandleDropped => break,
            };

        match connected {
            Ok(mut transport) => {
                link.set_state(ConnectionState::Connected);
                let end = run_session(
                    &mut transport,
                    &settings.viewer,
                    &mut cmd_rx,
                    &link,
                    &mut pending,
                    &mut shutdown_rx,
                )
                .await;
                fail_pending(&mut pending);

                match end {
                    SessionEnd::Shutdown | SessionEnd::HandleDropped => {
                        if let Err(e) = transport.close().await {
                            debug!("transport close failed: {e}");
                        }
                        break;
                    }
                    SessionEnd::Lost { reason, was_ready } => {
                        warn!("push connection lost: {reason}");
                        if was_ready {
                            failures = 0;
                        }
                    }
                }
            }
            Err(e) => {
                warn!("push connect failed: {e}");
            }
        }

        failures += 1;
        if failures > settings.max_reconnect_attempts {
            error!(
                attempts = settings.max_reconnect_attempts,
                "push reconnect attempts exhausted"
            );
            link.set_state(ConnectionState::Exhausted {
                attempts: settings.max_reconnect_attempts,
            });
            debug!("connection loop exited");
            return;
        }

        link.set_state(ConnectionState::Reconnecting { attempt: failures });
        let delay = tokio::time::sleep(settings.reconnect_delay);
        match wait_or_reject(delay, &mut cmd_rx, &mut shutdown_rx).await {
            Waited::Done(()) => {}
            Waited::Shutdown | Waited::HandleDropped => break,
        }
    }

    link.set_state(ConnectionState::Disconnected);
    debug!("connection loop exited");
}

/// Drive one connected session until it ends.
async fn run_session<T: Transport>(
    transport: &mut T,
    viewer: &Viewer,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    link: &Link,
    pending: &mut Pending,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> SessionEnd {
    let identify = ClientMessage::Identify {
        player_id: viewer.id,
        display_name: viewer.display_name.clone(),
    };
    if let Err(e) = send_message(transport, &identify).await {
        return SessionEnd::Lost {
            reason: format!("handshake failed: {e}"),
            was_ready: false,
        };
    }
    link.set_state(ConnectionState::Identified);
    let mut ready = false;

    loop {
        tokio::select! {
            _ = &mut *shutdown_rx => {
                debug!("shutdown signal received");
                return SessionEnd::Shutdown;
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Call { request_id, call, reply }) => {
                        if !ready {
                            let _ = reply.send(Err(SyncError::NotConnected));
                            continue;
                        }
                        let message = ClientMessage::Call { request_id, call };
                        match send_message(transport, &message).await {
                            Ok(()) => {
                                pending.insert(request_id, reply);
                            }
                            Err(SyncError::Serialization(e)) => {
                                error!("failed to serialize call: {e}");
                                let _ = reply.send(Err(SyncError::Serialization(e)));
                            }
                            Err(e) => {
                                let reason = format!("transport send error: {e}");
                                let _ = reply.send(Err(e));
                                return SessionEnd::Lost { reason, was_ready: ready };
                            }
                        }
                    }
                    Some(Command::Cancel { request_id }) => {
                        pending.remove(&request_id);
                    }
                    None => {
                        debug!("command channel closed, shutting down connection loop");
                        return SessionEnd::HandleDropped;
                    }
                }
            }

            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(message) => {
                            if let ServerMessage::Identified { player_id } = &message {
                                info!(player_id, "push: identified");
                                ready = true;
                                link.set_state(ConnectionState::Ready);
                            }
                            dispatch(message, pending, link);
                        }
                        Err(e) => {
                            warn!("failed to deserialize server message: {e} (raw: {text})");
                        }
                    },
                    Some(Err(e)) => {
                        return SessionEnd::Lost {
                            reason: format!("transport receive error: {e}"),
                            was_ready: ready,
                        };
                    }
                    None => {
                        return SessionEnd::Lost {
                            reason: "connection closed by server".into(),
                            was_ready: ready,
                        };
                    }
                }
            }
        }
    }
}

/// Route a server message to its pending caller or the event channel.
fn dispatch(message: ServerMessage, pending: &mut Pending, link: &Link) {
    match message {
        ServerMessage::Identified { .. } => {}
        ServerMessage::Snapshot(snapshot) => link.emit(PushEvent::Snapshot(snapshot)),
        ServerMessage::CallResult { request_id, result } => match pending.remove(&request_id) {
            Some(reply) => {
                let result = match result {
                    CallOutcome::Ok(value) => Ok(value),
                    CallOutcome::Error { message } => Err(SyncError::ActionRejected { message }),
                };
                let _ = reply.send(result);
            }
            None => debug!(request_id, "push: result for unknown or abandoned call"),
        },
        ServerMessage::PlayerJoined { game_id, player } => {
            link.emit(PushEvent::Lobby(LobbyNotice::PlayerJoined {
                game_id,
                player_id: player.user_id,
            }));
        }
        ServerMessage::PlayerLeft { game_id, player_id } => {
            link.emit(PushEvent::Lobby(LobbyNotice::PlayerLeft { game_id, player_id }));
        }
        ServerMessage::GameEnded { game_id } => {
            link.emit(PushEvent::Lobby(LobbyNotice::GameEnded { game_id }));
        }
        ServerMessage::Error { message } => {
            warn!("push: server error: {message}");
            link.emit(PushEvent::ServerError(message));
        }
    }
}

async fn send_message<T: Transport>(transport: &mut T, message: &ClientMessage) -> Result<()> {
    let json = serde_json::to_string(message)?;
    transport.send(json).await
}

/// Fail every pending call: the connection that would answer them is gone.
fn fail_pending(pending: &mut Pending) {
    if !pending.is_empty() {
        debug!(count = pending.len(), "push: failing pending calls");
    }
    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(SyncError::TransportClosed));
    }
}

/// Await `fut` while rejecting calls that arrive with no session up.
async fn wait_or_reject<F: Future>(
    fut: F,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> Waited<F::Output> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            _ = &mut *shutdown_rx => return Waited::Shutdown,
            output = &mut fut => return Waited::Done(output),
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Call { reply, .. }) => {
                    let _ = reply.send(Err(SyncError::NotConnected));
                }
                Some(Command::Cancel { .. }) => {}
                None => return Waited::HandleDropped,
            },
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::host::LoggingHost;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex as StdMutex};

    // ── Loopback transport ──────────────────────────────────────────

    /// Client half of an in-memory connection.
    struct LoopbackTransport {
        incoming: mpsc::UnboundedReceiver<std::result::Result<String, SyncError>>,
        outgoing: mpsc::UnboundedSender<String>,
    }

    /// Server half. Dropping it closes the connection.
    struct ServerEnd {
        to_client: mpsc::UnboundedSender<std::result::Result<String, SyncError>>,
        from_client: mpsc::UnboundedReceiver<String>,
    }

    impl ServerEnd {
        async fn next(&mut self) -> ClientMessage {
            let text = self.from_client.recv().await.unwrap();
            serde_json::from_str(&text).unwrap()
        }

        fn push(&self, message: &ServerMessage) {
            let json = serde_json::to_string(message).unwrap();
            self.to_client.send(Ok(json)).unwrap();
        }

        /// Read the handshake and acknowledge it.
        async fn accept(&mut self) {
            match self.next().await {
                ClientMessage::Identify { player_id, .. } => {
                    self.push(&ServerMessage::Identified { player_id });
                }
                other => panic!("expected identify, got {other:?}"),
            }
        }

        async fn next_call(&mut self) -> (u64, RemoteCall) {
            match self.next().await {
                ClientMessage::Call { request_id, call } => (request_id, call),
                other => panic!("expected call, got {other:?}"),
            }
        }
    }

    fn loopback() -> (LoopbackTransport, ServerEnd) {
        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_client) = mpsc::unbounded_channel();
        (
            LoopbackTransport { incoming, outgoing },
            ServerEnd {
                to_client,
                from_client,
            },
        )
    }

    #[async_trait]
    impl Transport for LoopbackTransport {
        async fn send(&mut self, message: String) -> std::result::Result<(), SyncError> {
            self.outgoing
                .send(message)
                .map_err(|_| SyncError::TransportSend("peer gone".into()))
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, SyncError>> {
            self.incoming.recv().await
        }

        async fn close(&mut self) -> std::result::Result<(), SyncError> {
            Ok(())
        }
    }

    /// Hands out scripted transports in order, then refuses.
    #[derive(Clone, Default)]
    struct ScriptedConnector {
        transports: Arc<StdMutex<VecDeque<LoopbackTransport>>>,
        attempts: Arc<AtomicUsize>,
    }

    impl ScriptedConnector {
        fn with(transports: Vec<LoopbackTransport>) -> Self {
            Self {
                transports: Arc::new(StdMutex::new(transports.into())),
                attempts: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self) -> std::result::Result<Box<dyn Transport>, SyncError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let next = self.transports.lock().unwrap().pop_front();
            match next {
                Some(transport) => Ok(Box::new(transport)),
                None => Err(SyncError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "refused",
                ))),
            }
        }
    }

    fn config() -> PushConfig {
        PushConfig::new().with_reconnect_delay(Duration::from_millis(100))
    }

    fn host() -> LoggingHost {
        LoggingHost::new(Viewer::new(42, "Ana"))
    }

    async fn wait_for_state(
        events: &mut mpsc::Receiver<PushEvent>,
        wanted: ConnectionState,
    ) -> Vec<ConnectionState> {
        let mut seen = Vec::new();
        while let Some(event) = events.recv().await {
            if let PushEvent::Connection(state) = event {
                seen.push(state);
                if state == wanted {
                    return seen;
                }
            }
        }
        panic!("event stream ended before {wanted:?}; saw {seen:?}");
    }

    fn lobby_json() -> serde_json::Value {
        serde_json::json!({ "my_id": 42, "my_games": [], "open_games": [], "recent_finished": [] })
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn handshake_walks_states_to_ready() {
        let (transport, mut server) = loopback();
        let mut adapter =
            PushAdapter::start(ScriptedConnector::with(vec![transport]), &host(), config());
        let mut events = adapter.take_push_events().unwrap();
        assert!(adapter.take_push_events().is_none());

        match server.next().await {
            ClientMessage::Identify {
                player_id,
                display_name,
            } => {
                assert_eq!(player_id, 42);
                assert_eq!(display_name, "Ana");
                server.push(&ServerMessage::Identified { player_id });
            }
            other => panic!("expected identify first, got {other:?}"),
        }

        let seen = wait_for_state(&mut events, ConnectionState::Ready).await;
        assert_eq!(
            seen,
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Identified,
                ConnectionState::Ready,
            ]
        );
        assert!(adapter.is_ready());
        assert_eq!(adapter.kind(), TransportKind::Push);
    }

    #[tokio::test]
    async fn identify_announces_the_host_viewer() {
        let host = LoggingHost::new(Viewer::new(7, "Marko"));
        let (transport, mut server) = loopback();
        let _adapter = PushAdapter::start(ScriptedConnector::with(vec![transport]), &host, config());

        match server.next().await {
            ClientMessage::Identify {
                player_id,
                display_name,
            } => assert_eq!(Viewer::new(player_id, display_name), host.viewer()),
            other => panic!("expected identify first, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn calls_are_correlated_by_request_id() {
        let (transport, mut server) = loopback();
        let mut adapter =
            PushAdapter::start(ScriptedConnector::with(vec![transport]), &host(), config());
        let mut events = adapter.take_push_events().unwrap();
        server.accept().await;
        wait_for_state(&mut events, ConnectionState::Ready).await;

        let server_side = async {
            let (request_id, call) = server.next_call().await;
            assert_eq!(call, RemoteCall::FetchLobby);
            // An unrelated id first: must not resolve the caller.
            server.push(&ServerMessage::CallResult {
                request_id: request_id + 100,
                result: CallOutcome::Ok(serde_json::json!({})),
            });
            server.push(&ServerMessage::CallResult {
                request_id,
                result: CallOutcome::Ok(lobby_json()),
            });
        };
        let (lobby, ()) = tokio::join!(adapter.fetch_lobby(), server_side);
        assert_eq!(lobby.unwrap().my_id, Some(42));
    }

    #[tokio::test]
    async fn rejection_carries_server_message() {
        let (transport, mut server) = loopback();
        let mut adapter =
            PushAdapter::start(ScriptedConnector::with(vec![transport]), &host(), config());
        let mut events = adapter.take_push_events().unwrap();
        server.accept().await;
        wait_for_state(&mut events, ConnectionState::Ready).await;

        let game_id = uuid::Uuid::from_u128(5);
        let server_side = async {
            let (request_id, call) = server.next_call().await;
            assert_eq!(call, RemoteCall::Action(GameAction::Pass { game_id }));
            server.push(&ServerMessage::CallResult {
                request_id,
                result: CallOutcome::Error {
                    message: "Nije tvoj red".into(),
                },
            });
        };
        let action = GameAction::Pass { game_id };
        let (result, ()) = tokio::join!(adapter.send_action(&action), server_side);
        match result {
            Err(SyncError::ActionRejected { message }) => assert_eq!(message, "Nije tvoj red"),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn calls_fail_fast_before_ready() {
        let (transport, mut server) = loopback();
        let mut adapter =
            PushAdapter::start(ScriptedConnector::with(vec![transport]), &host(), config());
        let mut events = adapter.take_push_events().unwrap();
        // Read the identify but never acknowledge it.
        assert!(matches!(server.next().await, ClientMessage::Identify { .. }));
        wait_for_state(&mut events, ConnectionState::Identified).await;

        let result = adapter.fetch_lobby().await;
        assert!(matches!(result, Err(SyncError::NotConnected)));
        assert!(server.from_client.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn drop_fails_pending_and_reconnects() {
        let (first, mut server1) = loopback();
        let (second, mut server2) = loopback();
        let mut adapter = PushAdapter::start(
            ScriptedConnector::with(vec![first, second]),
            &host(),
            config(),
        );
        let mut events = adapter.take_push_events().unwrap();
        server1.accept().await;
        wait_for_state(&mut events, ConnectionState::Ready).await;

        let server_side = async move {
            let _ = server1.next_call().await;
            drop(server1);
        };
        let (result, ()) = tokio::join!(adapter.fetch_lobby(), server_side);
        assert!(matches!(result, Err(SyncError::TransportClosed)));

        let seen = wait_for_state(&mut events, ConnectionState::Connected).await;
        assert_eq!(seen.first(), Some(&ConnectionState::Reconnecting { attempt: 1 }));

        server2.accept().await;
        wait_for_state(&mut events, ConnectionState::Ready).await;
        assert!(adapter.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_reconnect_budget() {
        let connector = ScriptedConnector::default();
        let attempts = Arc::clone(&connector.attempts);
        let mut adapter =
            PushAdapter::start(connector, &host(), config().with_max_reconnect_attempts(2));
        let mut events = adapter.take_push_events().unwrap();

        let seen = wait_for_state(&mut events, ConnectionState::Exhausted { attempts: 2 }).await;
        assert_eq!(
            seen,
            vec![
                ConnectionState::Connecting,
                ConnectionState::Reconnecting { attempt: 1 },
                ConnectionState::Reconnecting { attempt: 2 },
                ConnectionState::Exhausted { attempts: 2 },
            ]
        );
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(matches!(
            adapter.fetch_lobby().await,
            Err(SyncError::ReconnectExhausted { attempts: 2 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn call_times_out_without_result() {
        let (transport, mut server) = loopback();
        let mut adapter = PushAdapter::start(
            ScriptedConnector::with(vec![transport]),
            &host(),
            config().with_call_timeout(Duration::from_secs(1)),
        );
        let mut events = adapter.take_push_events().unwrap();
        server.accept().await;
        wait_for_state(&mut events, ConnectionState::Ready).await;

        assert!(matches!(
            adapter.fetch_lobby().await,
            Err(SyncError::Timeout)
        ));
    }

    #[tokio::test]
    async fn unsolicited_messages_become_events() {
        let (transport, mut server) = loopback();
        let mut adapter =
            PushAdapter::start(ScriptedConnector::with(vec![transport]), &host(), config());
        let mut events = adapter.take_push_events().unwrap();
        server.accept().await;
        wait_for_state(&mut events, ConnectionState::Ready).await;

        let game_id = uuid::Uuid::from_u128(9);
        server.push(&ServerMessage::GameEnded { game_id });
        server.push(&ServerMessage::Error {
            message: "oops".into(),
        });
        server
            .to_client
            .send(Ok("not json".to_string()))
            .unwrap();
        server.push(&ServerMessage::PlayerLeft {
            game_id,
            player_id: 7,
        });

        assert_eq!(
            events.recv().await,
            Some(PushEvent::Lobby(LobbyNotice::GameEnded { game_id }))
        );
        assert_eq!(
            events.recv().await,
            Some(PushEvent::ServerError("oops".into()))
        );
        // Malformed frames are skipped, the session stays up.
        assert_eq!(
            events.recv().await,
            Some(PushEvent::Lobby(LobbyNotice::PlayerLeft {
                game_id,
                player_id: 7
            }))
        );
        assert!(adapter.is_ready());
    }

    #[tokio::test]
    async fn shutdown_closes_and_reports_disconnected() {
        let (transport, mut server) = loopback();
        let mut adapter =
            PushAdapter::start(ScriptedConnector::with(vec![transport]), &host(), config());
        let mut events = adapter.take_push_events().unwrap();
        server.accept().await;
        wait_for_state(&mut events, ConnectionState::Ready).await;

        adapter.shutdown().await;
        assert_eq!(adapter.state(), ConnectionState::Disconnected);
        assert!(matches!(
            adapter.fetch_lobby().await,
            Err(SyncError::NotConnected)
        ));
        // Double shutdown is harmless.
        adapter.shutdown().await;
    }

    #[test]
    fn config_defaults() {
        let config = PushConfig::new().with_event_channel_capacity(0);
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.reconnect_delay, Duration::from_secs(2));
        assert_eq!(config.call_timeout, Duration::from_secs(10));
        assert_eq!(config.event_channel_capacity, 1);
    }
}
