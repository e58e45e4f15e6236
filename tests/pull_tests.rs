//! Pull adapter tests against a local HTTP server.
//!
//! Each test starts an axum server on an ephemeral port that records every
//! request and answers with a scripted status and body.

#![cfg(feature = "transport-http")]
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::routing::get;
use axum::Router;
use autobus_sync::{
    Card, ConnectionState, GameAction, GuessDirection, PullAdapter, PullConfig, SyncError,
    SyncTransport, TransportKind,
};
use serde_json::json;

use common::{pyramid_snapshot, GAME};

const CREDENTIAL: &str = "query_id=AAE&user=%7B%22id%22%3A42%7D&hash=abc";

// ── Test server ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Recorded {
    method: Method,
    query: HashMap<String, String>,
    credential: Option<String>,
    body: Option<serde_json::Value>,
}

type Responder = dyn Fn(&Recorded) -> (StatusCode, String) + Send + Sync;

struct Server {
    requests: StdMutex<Vec<Recorded>>,
    respond: Box<Responder>,
    delay: Option<Duration>,
}

impl Server {
    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

async fn endpoint(
    State(server): State<Arc<Server>>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> (StatusCode, String) {
    let recorded = Recorded {
        method,
        query,
        credential: headers
            .get("x-telegram-init-data")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        body: (!body.is_empty()).then(|| serde_json::from_slice(&body).unwrap()),
    };
    server.requests.lock().unwrap().push(recorded.clone());
    if let Some(delay) = server.delay {
        tokio::time::sleep(delay).await;
    }
    (server.respond)(&recorded)
}

async fn serve_with(
    delay: Option<Duration>,
    respond: impl Fn(&Recorded) -> (StatusCode, String) + Send + Sync + 'static,
) -> (String, Arc<Server>) {
    let server = Arc::new(Server {
        requests: StdMutex::new(Vec::new()),
        respond: Box::new(respond),
        delay,
    });
    let app = Router::new()
        .route("/api/autobus", get(endpoint).post(endpoint))
        .with_state(Arc::clone(&server));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/"), server)
}

async fn serve(
    respond: impl Fn(&Recorded) -> (StatusCode, String) + Send + Sync + 'static,
) -> (String, Arc<Server>) {
    serve_with(None, respond).await
}

fn adapter(base_url: &str) -> PullAdapter {
    PullAdapter::new(PullConfig::new(base_url, CREDENTIAL)).unwrap()
}

fn ok(value: serde_json::Value) -> (StatusCode, String) {
    (StatusCode::OK, value.to_string())
}

// ── Reads ───────────────────────────────────────────────────────────

#[tokio::test]
async fn fetches_snapshot_with_credential() {
    let snapshot = pyramid_snapshot(vec![]);
    let body = serde_json::to_value(&snapshot).unwrap();
    let (url, server) = serve(move |_| ok(body.clone())).await;
    let adapter = adapter(&url);

    let fetched = adapter.fetch_snapshot(GAME).await.unwrap();
    assert_eq!(fetched, snapshot);

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.method, Method::GET);
    assert_eq!(request.query["op"], "state");
    assert_eq!(request.query["id"], GAME.to_string());
    assert_eq!(request.credential.as_deref(), Some(CREDENTIAL));
    assert!(request.body.is_none());
}

#[tokio::test]
async fn fetches_lobby() {
    let (url, server) = serve(|_| {
        ok(json!({
            "my_id": 42,
            "my_games": [],
            "open_games": [
                { "id": GAME, "status": "lobby", "created_by": 7, "creator_name": "Marko" }
            ],
            "recent_finished": []
        }))
    })
    .await;

    let listing = adapter(&url).fetch_lobby().await.unwrap();
    assert_eq!(listing.my_id, Some(42));
    assert_eq!(listing.open_games.len(), 1);
    assert_eq!(listing.open_games[0].creator_name.as_deref(), Some("Marko"));
    assert_eq!(server.requests()[0].query["op"], "lobby");
    assert!(!server.requests()[0].query.contains_key("id"));
}

// ── Actions ─────────────────────────────────────────────────────────

#[tokio::test]
async fn match_posts_card_and_target() {
    let (url, server) = serve(|_| ok(json!({ "ok": true, "drinks_given": 3, "cards_left": 2 })))
        .await;

    let reply = adapter(&url)
        .send_action(&GameAction::Match {
            game_id: GAME,
            card: Card::new("Q", "♦️"),
            target_user_id: 7,
        })
        .await
        .unwrap();
    assert!(reply.ok);
    assert_eq!(reply.drinks_given, Some(3));
    assert_eq!(reply.cards_left, Some(2));

    let requests = server.requests();
    let request = &requests[0];
    assert_eq!(request.method, Method::POST);
    assert_eq!(request.query["op"], "match");
    assert_eq!(request.query["id"], GAME.to_string());
    assert_eq!(
        request.body,
        Some(json!({ "card": { "rank": "Q", "suit": "♦️" }, "target_user_id": 7 }))
    );
}

#[tokio::test]
async fn bus_guess_posts_direction() {
    let (url, server) = serve(|_| {
        ok(json!({
            "ok": true,
            "new_card": { "rank": "J", "suit": "♣️" },
            "bus_progress": 2,
            "flavor_text": "✅ Pogodio!"
        }))
    })
    .await;

    let reply = adapter(&url)
        .send_action(&GameAction::BusGuess {
            game_id: GAME,
            guess: GuessDirection::Lower,
        })
        .await
        .unwrap();
    assert_eq!(reply.new_card, Some(Card::new("J", "♣️")));
    assert_eq!(reply.bus_progress, Some(2));
    assert_eq!(server.requests()[0].query["op"], "bus_guess");
    assert_eq!(server.requests()[0].body, Some(json!({ "guess": "lower" })));
}

#[tokio::test]
async fn create_sends_no_id_and_no_body() {
    let (url, server) = serve(|_| ok(json!({ "ok": true, "game_id": GAME }))).await;

    let reply = adapter(&url).send_action(&GameAction::Create).await.unwrap();
    assert_eq!(reply.game_id, Some(GAME));

    let requests = server.requests();
    let request = &requests[0];
    assert_eq!(request.method, Method::POST);
    assert_eq!(request.query["op"], "create");
    assert!(!request.query.contains_key("id"));
    assert!(request.body.is_none());
}

// ── Failures ────────────────────────────────────────────────────────

#[tokio::test]
async fn error_body_is_a_rejection() {
    let (url, _server) = serve(|_| {
        (
            StatusCode::BAD_REQUEST,
            json!({ "error": "Nije tvoj red" }).to_string(),
        )
    })
    .await;

    let result = adapter(&url)
        .send_action(&GameAction::Pass { game_id: GAME })
        .await;
    match result {
        Err(SyncError::ActionRejected { message }) => assert_eq!(message, "Nije tvoj red"),
        other => panic!("expected ActionRejected, got {other:?}"),
    }
}

#[tokio::test]
async fn error_body_with_success_status_is_a_rejection() {
    let (url, _server) = serve(|_| ok(json!({ "error": "Igra nije aktivna" }))).await;

    let result = adapter(&url).send_action(&GameAction::Flip { game_id: GAME }).await;
    assert!(
        matches!(result, Err(SyncError::ActionRejected { ref message }) if message == "Igra nije aktivna")
    );
}

#[tokio::test]
async fn server_failure_without_error_body() {
    let (url, _server) = serve(|_| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "upstream exploded".to_string(),
        )
    })
    .await;

    let result = adapter(&url).fetch_lobby().await;
    match result {
        Err(error @ SyncError::Http(_)) => {
            assert_eq!(error.to_string(), "http error: status 500");
            assert!(error.is_transport_unavailable());
        }
        other => panic!("expected Http error, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_success_body_is_a_decode_error() {
    let (url, _server) = serve(|_| ok(json!({ "unexpected": true }))).await;

    let result = adapter(&url).fetch_snapshot(GAME).await;
    assert!(matches!(result, Err(SyncError::Serialization(_))));
}

#[tokio::test]
async fn slow_server_times_out() {
    let (url, _server) = serve_with(Some(Duration::from_secs(5)), |_| ok(json!({}))).await;
    let adapter = PullAdapter::new(
        PullConfig::new(url, CREDENTIAL).with_request_timeout(Duration::from_millis(100)),
    )
    .unwrap();

    let result = adapter.fetch_lobby().await;
    assert!(matches!(result, Err(SyncError::Timeout)));
}

#[tokio::test]
async fn unreachable_service_is_an_http_error() {
    // Bind and drop to find a port nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = adapter(&format!("http://{addr}")).fetch_lobby().await;
    assert!(matches!(result, Err(SyncError::Http(_))));
}

// ── Adapter shape ───────────────────────────────────────────────────

#[tokio::test]
async fn custom_credential_header() {
    let seen = Arc::new(StdMutex::new(None));
    let seen_in_handler = Arc::clone(&seen);
    let app = Router::new().route(
        "/api/autobus",
        get(move |headers: HeaderMap| {
            let seen = Arc::clone(&seen_in_handler);
            async move {
                *seen.lock().unwrap() = headers
                    .get("authorization")
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string);
                json!({ "my_id": 1 }).to_string()
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let adapter = PullAdapter::new(
        PullConfig::new(format!("http://{addr}"), "tma token").with_credential_header("authorization"),
    )
    .unwrap();
    adapter.fetch_lobby().await.unwrap();
    assert_eq!(seen.lock().unwrap().as_deref(), Some("tma token"));
}

#[test]
fn pull_adapter_is_always_ready() {
    let adapter = adapter("http://127.0.0.1:1");
    assert_eq!(adapter.kind(), TransportKind::Pull);
    assert_eq!(adapter.connection_state(), ConnectionState::Ready);
    assert!(adapter.is_ready());
}
