//! End-to-end engine tests against a scripted transport.
//!
//! Uses `ScriptedTransport` from `tests/common` to script service replies and
//! verify what `SyncClient` publishes: state, events, alerts and the calls
//! it makes (or, for polling, does not make).

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use autobus_sync::protocol::FlippedCard;
use autobus_sync::{
    ActionKind, ActionReply, Card, ConnectionState, GameAction, GuessDirection, LobbyListing,
    LobbyNotice, PushEvent, Screen, SyncClient, SyncConfig, SyncError, SyncEvent, ToastKind,
    TransportKind,
};
use tokio::sync::mpsc;

use common::{
    bus_snapshot, drain, entry, my_match_turn, pyramid_snapshot, wait_for, Call, RecordingHost,
    Script, ScriptedTransport, GAME,
};

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

fn start_pull() -> (
    SyncClient,
    mpsc::Receiver<SyncEvent>,
    Arc<Script>,
    RecordingHost,
) {
    let (transport, script) = ScriptedTransport::pull();
    let host = RecordingHost::default();
    let (client, events) = SyncClient::start(transport, host.clone(), SyncConfig::new());
    (client, events, script, host)
}

fn start_push() -> (
    SyncClient,
    mpsc::Receiver<SyncEvent>,
    Arc<Script>,
    mpsc::Sender<PushEvent>,
) {
    let (transport, script, push_tx) = ScriptedTransport::push();
    let (client, events) =
        SyncClient::start(transport, RecordingHost::default(), SyncConfig::new());
    (client, events, script, push_tx)
}

/// Open the test game with `snapshot` as its first state and drain the events.
async fn open_with(
    client: &SyncClient,
    events: &mut mpsc::Receiver<SyncEvent>,
    script: &Script,
    snapshot: autobus_sync::Snapshot,
) {
    script.queue_snapshot(snapshot);
    client.open_game(GAME).await.unwrap();
    drain(events);
}

fn flip_reply() -> ActionReply {
    ActionReply {
        ok: true,
        card: Some(Card::new("K", "♠️")),
        drink_value: Some(1),
        ..Default::default()
    }
}

fn is_state_update(event: &SyncEvent) -> bool {
    matches!(event, SyncEvent::StateUpdated { .. })
}

// ════════════════════════════════════════════════════════════════════
// Start-up and navigation
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn starts_in_lobby_and_fetches_listing() {
    let (transport, script) = ScriptedTransport::pull();
    script.set_lobby(LobbyListing {
        my_id: Some(42),
        ..Default::default()
    });
    let (client, mut events) =
        SyncClient::start(transport, RecordingHost::default(), SyncConfig::new());

    let first = events.recv().await.expect("event");
    assert_eq!(
        first,
        SyncEvent::Started {
            transport: TransportKind::Pull
        }
    );
    let (lobby, _) = wait_for(&mut events, |e| matches!(e, SyncEvent::LobbyUpdated(_))).await;
    match lobby {
        SyncEvent::LobbyUpdated(listing) => assert_eq!(listing.my_id, Some(42)),
        other => panic!("expected LobbyUpdated, got {other:?}"),
    }

    let view = client.view();
    assert_eq!(view.screen, Screen::Lobby);
    assert_eq!(view.lobby.unwrap().my_id, Some(42));
    assert_eq!(script.calls(), vec![Call::FetchLobby]);
}

#[tokio::test]
async fn open_game_publishes_first_snapshot() {
    let (client, mut events, script, _host) = start_pull();
    let snapshot = pyramid_snapshot(vec![]);
    script.queue_snapshot(snapshot.clone());

    client.open_game(GAME).await.unwrap();

    let view = client.view();
    assert_eq!(view.screen, Screen::Game(GAME));
    assert_eq!(view.active_game(), Some(GAME));
    assert_eq!(view.snapshot.as_deref(), Some(&snapshot));
    assert!(!view.optimistic);

    let (_, before) = wait_for(&mut events, is_state_update).await;
    assert!(before.contains(&SyncEvent::ScreenChanged(Screen::Game(GAME))));
}

#[tokio::test]
async fn failed_open_keeps_the_game_on_screen() {
    let (client, mut events, script, host) = start_pull();
    script.fail_next_fetch(SyncError::Http("boom".into()));

    let result = client.open_game(GAME).await;
    assert!(matches!(result, Err(SyncError::Http(_))));
    assert_eq!(client.view().screen, Screen::Game(GAME));
    assert!(client.view().snapshot.is_none());
    // Reads never alert.
    assert!(host.alerts().is_empty());
    wait_for(&mut events, |e| matches!(e, SyncEvent::FetchFailed { .. })).await;
}

#[tokio::test]
async fn show_lobby_leaves_the_game() {
    let (client, mut events, script, _host) = start_pull();
    open_with(&client, &mut events, &script, pyramid_snapshot(vec![])).await;

    client.show_lobby().await.unwrap();
    let view = client.view();
    assert_eq!(view.screen, Screen::Lobby);
    assert!(view.snapshot.is_none());
    assert_eq!(script.lobby_fetches(), 2);
}

#[tokio::test]
async fn start_game_opens_it() {
    let (client, _events, script, _host) = start_pull();
    script.queue_snapshot(pyramid_snapshot(vec![]));

    client.start_game(GAME).await.unwrap();
    // The follow-up open runs after the reply; a refresh queues behind it.
    client.refresh().await.unwrap();

    assert_eq!(client.view().screen, Screen::Game(GAME));
    assert_eq!(
        script.calls()[..3],
        [
            Call::FetchLobby,
            Call::Action(GameAction::Start { game_id: GAME }),
            Call::FetchSnapshot(GAME),
        ]
    );
}

#[tokio::test]
async fn create_and_join_refresh_the_lobby() {
    let (client, _events, script, _host) = start_pull();
    script.queue_reply(Ok(ActionReply {
        ok: true,
        game_id: Some(GAME),
        ..Default::default()
    }));

    let reply = client.create_game().await.unwrap();
    assert_eq!(reply.game_id, Some(GAME));
    client.join_game(GAME).await.unwrap();
    client.refresh().await.unwrap();

    assert_eq!(script.lobby_fetches(), 4);
    assert_eq!(
        script.actions(),
        vec![GameAction::Create, GameAction::Join { game_id: GAME }]
    );
}

// ════════════════════════════════════════════════════════════════════
// Optimistic actions
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn flip_overlay_matches_the_confirmation() {
    let (client, mut events, script, _host) = start_pull();
    open_with(
        &client,
        &mut events,
        &script,
        pyramid_snapshot(vec![entry("flip", "", 100)]),
    )
    .await;

    let mut confirmed = pyramid_snapshot(vec![entry("flip", "", 100), entry("flip", "", 200)]);
    confirmed.pyramid[1].flipped = true;
    confirmed.pyramid[1].rank = Some("K".into());
    confirmed.pyramid[1].suit = Some("♠️".into());
    confirmed.game.current_card_index = 1;
    confirmed.game.matching_done = false;
    confirmed.current_flipped_card = Some(FlippedCard {
        rank: "K".into(),
        suit: "♠️".into(),
        index: 1,
        drink_value: 1,
    });
    confirmed.needs_flip = false;
    script.queue_reply(Ok(flip_reply()));
    script.queue_snapshot(confirmed.clone());

    let reply = client.flip().await.unwrap();
    assert_eq!(reply.card, Some(Card::new("K", "♠️")));

    let (completed, _) =
        wait_for(&mut events, |e| matches!(e, SyncEvent::ActionCompleted { .. })).await;
    match completed {
        SyncEvent::ActionCompleted { kind, summary, .. } => {
            assert_eq!(kind, ActionKind::Flip);
            assert_eq!(summary.as_deref(), Some("Okrenuta: K♠️ (1 cugova)"));
        }
        other => panic!("expected ActionCompleted, got {other:?}"),
    }

    let (overlay, _) = wait_for(&mut events, is_state_update).await;
    let (authoritative, _) = wait_for(&mut events, is_state_update).await;
    let overlay = match overlay {
        SyncEvent::StateUpdated {
            snapshot,
            optimistic: true,
        } => snapshot,
        other => panic!("expected optimistic update, got {other:?}"),
    };
    let authoritative = match authoritative {
        SyncEvent::StateUpdated {
            snapshot,
            optimistic: false,
        } => snapshot,
        other => panic!("expected confirmed update, got {other:?}"),
    };

    // The overlay shows exactly what the service then confirms.
    assert_eq!(overlay.pyramid, authoritative.pyramid);
    assert_eq!(overlay.game, authoritative.game);
    assert_eq!(overlay.current_flipped_card, authoritative.current_flipped_card);
    assert_eq!(overlay.needs_flip, authoritative.needs_flip);
    assert_eq!(*authoritative, confirmed);
    assert!(!client.view().optimistic);
}

#[tokio::test]
async fn rejected_pass_reverts_and_alerts_server_text() {
    let (client, mut events, script, host) = start_pull();
    open_with(&client, &mut events, &script, my_match_turn(vec![])).await;
    script.queue_reply(Err(SyncError::ActionRejected {
        message: "Nije tvoj red".into(),
    }));

    let result = client.pass_turn().await;
    assert!(matches!(result, Err(SyncError::ActionRejected { .. })));

    let (overlay, _) = wait_for(&mut events, is_state_update).await;
    match overlay {
        SyncEvent::StateUpdated {
            snapshot,
            optimistic: true,
        } => assert!(!snapshot.is_my_match_turn),
        other => panic!("expected optimistic update, got {other:?}"),
    }
    let (failed, _) = wait_for(&mut events, |e| matches!(e, SyncEvent::ActionFailed { .. })).await;
    assert_eq!(
        failed,
        SyncEvent::ActionFailed {
            kind: ActionKind::Pass,
            message: "Nije tvoj red".into()
        }
    );
    let (reverted, _) = wait_for(&mut events, is_state_update).await;
    match reverted {
        SyncEvent::StateUpdated {
            snapshot,
            optimistic: false,
        } => assert!(snapshot.is_my_match_turn),
        other => panic!("expected reverted update, got {other:?}"),
    }

    assert_eq!(host.alerts(), vec!["Nije tvoj red".to_string()]);
    // Failures are not followed by a confirmation read.
    assert_eq!(script.snapshot_fetches(), 1);
    assert!(!client.is_acting());
}

#[tokio::test]
async fn match_removes_the_card_until_confirmed() {
    let (client, mut events, script, _host) = start_pull();
    open_with(
        &client,
        &mut events,
        &script,
        my_match_turn(vec![entry("flip", "", 100)]),
    )
    .await;
    script.queue_reply(Ok(ActionReply {
        ok: true,
        drinks_given: Some(5),
        cards_left: Some(1),
        ..Default::default()
    }));

    client.submit_match(Card::new("3", "♥️"), 7).await.unwrap();
    let (overlay, _) = wait_for(&mut events, is_state_update).await;
    match overlay {
        SyncEvent::StateUpdated {
            snapshot,
            optimistic: true,
        } => {
            assert_eq!(snapshot.my_hand, vec![Card::new("9", "♠️")]);
            assert!(!snapshot.can_match);
        }
        other => panic!("expected optimistic update, got {other:?}"),
    }
    assert_eq!(
        script.actions(),
        vec![GameAction::Match {
            game_id: GAME,
            card: Card::new("3", "♥️"),
            target_user_id: 7
        }]
    );
}

#[tokio::test]
async fn unavailable_transport_fails_fast_without_mutation() {
    let (client, mut events, script, host) = start_pull();
    let snapshot = my_match_turn(vec![]);
    open_with(&client, &mut events, &script, snapshot.clone()).await;
    script.set_ready(false);

    let result = client.pass_turn().await;
    assert!(matches!(result, Err(SyncError::NotConnected)));
    let result = client.submit_match(Card::new("3", "♥️"), 7).await;
    assert!(matches!(result, Err(SyncError::NotConnected)));
    assert!(script.actions().is_empty());
    // Each action alerts its own text.
    assert_eq!(
        host.alerts(),
        vec!["Greska".to_string(), "Greska pri matchovanju".to_string()]
    );

    let view = client.view();
    assert!(!view.optimistic);
    assert_eq!(view.snapshot.as_deref(), Some(&snapshot));
    assert!(!drain(&mut events).iter().any(is_state_update));
}

#[tokio::test]
async fn configured_fallback_replaces_per_action_text() {
    let (transport, script) = ScriptedTransport::pull();
    let host = RecordingHost::default();
    let (client, mut events) = SyncClient::start(
        transport,
        host.clone(),
        SyncConfig::new().with_fallback_message("Error"),
    );
    open_with(&client, &mut events, &script, pyramid_snapshot(vec![])).await;
    script.set_ready(false);

    tokio_test::assert_err!(client.flip().await);
    assert_eq!(host.alerts(), vec!["Error".to_string()]);
    let (failed, _) =
        wait_for(&mut events, |e| matches!(e, SyncEvent::ActionFailed { .. })).await;
    assert_eq!(
        failed,
        SyncEvent::ActionFailed {
            kind: ActionKind::Flip,
            message: "Error".into()
        }
    );
}

#[tokio::test]
async fn second_action_while_one_is_in_flight_is_rejected() {
    let (client, mut events, script, host) = start_pull();
    open_with(&client, &mut events, &script, my_match_turn(vec![])).await;
    script.hold_actions();

    let second = async {
        while script.actions().is_empty() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(client.is_acting());
        let result = client.bus_guess(GuessDirection::Higher).await;
        script.release_action();
        result
    };
    let (first, second) = tokio::join!(client.pass_turn(), second);

    assert!(first.is_ok());
    assert!(matches!(second, Err(SyncError::ActionInFlight)));
    assert_eq!(script.actions().len(), 1);
    assert!(host.alerts().is_empty());
    assert!(!client.is_acting());
}

#[tokio::test]
async fn in_game_action_without_open_game() {
    let (client, _events, script, _host) = start_pull();
    let error = tokio_test::assert_err!(client.flip().await);
    assert!(matches!(error, SyncError::NoActiveGame));
    // The slot was released.
    tokio_test::assert_ok!(client.create_game().await);
    assert_eq!(script.actions(), vec![GameAction::Create]);
}

#[tokio::test]
async fn leaving_the_open_game_returns_to_lobby() {
    let (client, mut events, script, _host) = start_pull();
    open_with(&client, &mut events, &script, pyramid_snapshot(vec![])).await;

    tokio_test::assert_ok!(client.leave_game(GAME).await);
    tokio_test::assert_ok!(client.refresh().await);
    assert_eq!(client.view().screen, Screen::Lobby);
}

// ════════════════════════════════════════════════════════════════════
// Notifications
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn one_toast_per_update_and_no_repeats() {
    let (client, mut events, script, _host) = start_pull();
    script.queue_snapshot(pyramid_snapshot(vec![
        entry("match", "A", 90),
        entry("flip", "", 95),
        entry("match", "B", 100),
    ]));
    client.open_game(GAME).await.unwrap();

    let (toast, _) = wait_for(&mut events, |e| matches!(e, SyncEvent::Toast(_))).await;
    match toast {
        SyncEvent::Toast(toast) => {
            assert_eq!(toast.key, 100);
            assert_eq!(toast.text, "B");
            assert_eq!(toast.kind, ToastKind::Match);
        }
        other => panic!("expected toast, got {other:?}"),
    }

    // Polls keep returning the same log: nothing new to show.
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(script.snapshot_fetches() > 1);
    let later = drain(&mut events);
    assert!(!later.iter().any(|e| matches!(e, SyncEvent::Toast(_))));
    assert!(!later.iter().any(is_state_update));

    // New tail C (flip) then D (match): only D is shown.
    script.queue_snapshot(pyramid_snapshot(vec![
        entry("match", "B", 100),
        entry("flip", "", 110),
        entry("match", "D", 120),
    ]));
    let (toast, _) = wait_for(&mut events, |e| matches!(e, SyncEvent::Toast(_))).await;
    match toast {
        SyncEvent::Toast(toast) => assert_eq!(toast.text, "D"),
        other => panic!("expected toast, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn toast_expires_after_its_lifetime() {
    let (client, mut events, script, _host) = start_pull();
    script.queue_snapshot(my_match_turn(vec![entry("bus_start", "Autobus krece!", 100)]));
    client.open_game(GAME).await.unwrap();

    let (toast, _) = wait_for(&mut events, |e| matches!(e, SyncEvent::Toast(_))).await;
    let SyncEvent::Toast(toast) = toast else {
        panic!("expected toast");
    };
    assert_eq!(toast.kind, ToastKind::BusPhaseStart);
    assert_eq!(client.view().toast.as_ref(), Some(&toast));

    let started = tokio::time::Instant::now();
    let (cleared, _) =
        wait_for(&mut events, |e| matches!(e, SyncEvent::ToastCleared { .. })).await;
    assert_eq!(cleared, SyncEvent::ToastCleared { key: 100 });
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert!(client.view().toast.is_none());
}

#[tokio::test(start_paused = true)]
async fn bus_guess_toast_is_classified() {
    let (client, mut events, script, _host) = start_pull();
    script.queue_snapshot(bus_snapshot(vec![entry(
        "bus_guess",
        "Marko: ✅ pogodio!",
        300,
    )]));
    client.open_game(GAME).await.unwrap();

    let (toast, _) = wait_for(&mut events, |e| matches!(e, SyncEvent::Toast(_))).await;
    match toast {
        SyncEvent::Toast(toast) => assert_eq!(toast.kind, ToastKind::BusGuessCorrect),
        other => panic!("expected toast, got {other:?}"),
    }
}

// ════════════════════════════════════════════════════════════════════
// Polling
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn no_polling_on_own_turn() {
    let (client, mut events, script, _host) = start_pull();
    open_with(&client, &mut events, &script, my_match_turn(vec![])).await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(script.snapshot_fetches(), 1);
}

#[tokio::test(start_paused = true)]
async fn polls_while_others_act() {
    let (client, mut events, script, _host) = start_pull();
    open_with(&client, &mut events, &script, bus_snapshot(vec![])).await;

    tokio::time::sleep(Duration::from_millis(2_100)).await;
    // Bus phase polls every 500 ms.
    assert_eq!(script.snapshot_fetches(), 1 + 4);
}

#[tokio::test(start_paused = true)]
async fn polling_stops_when_the_game_finishes() {
    let (client, mut events, script, _host) = start_pull();
    open_with(&client, &mut events, &script, bus_snapshot(vec![])).await;

    let mut finished = bus_snapshot(vec![entry("game_end", "Kraj igre", 50)]);
    finished.game.status = autobus_sync::protocol::GameStatus::Finished;
    script.queue_snapshot(finished);
    wait_for(&mut events, |e| matches!(e, SyncEvent::Toast(_))).await;

    let fetches = script.snapshot_fetches();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(script.snapshot_fetches(), fetches);
}

#[tokio::test(start_paused = true)]
async fn stale_poll_does_not_regress_state() {
    let (client, mut events, script, _host) = start_pull();
    let newer = bus_snapshot(vec![entry("bus_guess", "❌", 200)]);
    open_with(&client, &mut events, &script, newer.clone()).await;

    // A late response carrying an older log tail.
    let mut older = bus_snapshot(vec![entry("flip", "", 150)]);
    older.game.bus_progress = 4;
    script.queue_snapshot(older);
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert!(script.snapshot_fetches() >= 2);
    assert_eq!(client.view().snapshot.as_deref(), Some(&newer));
}

// ════════════════════════════════════════════════════════════════════
// Push transport
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn pushed_snapshots_apply_without_polling() {
    let (client, mut events, script, push_tx) = start_push();
    assert_eq!(
        events.recv().await,
        Some(SyncEvent::Started {
            transport: TransportKind::Push
        })
    );
    open_with(&client, &mut events, &script, bus_snapshot(vec![])).await;

    let pushed = bus_snapshot(vec![entry("bus_guess", "Marko ✅", 10)]);
    push_tx
        .send(PushEvent::Snapshot(Box::new(pushed.clone())))
        .await
        .unwrap();
    wait_for(&mut events, |e| matches!(e, SyncEvent::Toast(_))).await;
    assert_eq!(client.view().snapshot.as_deref(), Some(&pushed));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(script.snapshot_fetches(), 1);
}

#[tokio::test]
async fn pushed_snapshot_for_another_game_is_ignored() {
    let (client, mut events, script, push_tx) = start_push();
    let snapshot = pyramid_snapshot(vec![]);
    open_with(&client, &mut events, &script, snapshot.clone()).await;

    let mut other = pyramid_snapshot(vec![entry("match", "x", 10)]);
    other.game.id = uuid::Uuid::from_u128(1);
    push_tx
        .send(PushEvent::Snapshot(Box::new(other)))
        .await
        .unwrap();
    client.refresh().await.unwrap();

    assert_eq!(client.view().snapshot.as_deref(), Some(&snapshot));
}

#[tokio::test]
async fn lobby_notice_refreshes_the_lobby() {
    let (client, mut events, script, push_tx) = start_push();
    wait_for(&mut events, |e| matches!(e, SyncEvent::LobbyUpdated(_))).await;

    push_tx
        .send(PushEvent::Lobby(LobbyNotice::PlayerJoined {
            game_id: GAME,
            player_id: 7,
        }))
        .await
        .unwrap();
    wait_for(&mut events, |e| matches!(e, SyncEvent::LobbyUpdated(_))).await;
    assert_eq!(script.lobby_fetches(), 2);
    drop(client);
}

#[tokio::test]
async fn reconnect_resyncs_and_exhaustion_is_reported() {
    let (client, mut events, script, push_tx) = start_push();
    open_with(&client, &mut events, &script, pyramid_snapshot(vec![])).await;

    push_tx
        .send(PushEvent::Connection(ConnectionState::Reconnecting {
            attempt: 1,
        }))
        .await
        .unwrap();
    push_tx
        .send(PushEvent::Connection(ConnectionState::Ready))
        .await
        .unwrap();
    wait_for(&mut events, |e| {
        *e == SyncEvent::Connection(ConnectionState::Ready)
    })
    .await;
    client.refresh().await.unwrap();
    // Open, resync after Ready, explicit refresh.
    assert_eq!(script.snapshot_fetches(), 3);

    push_tx
        .send(PushEvent::Connection(ConnectionState::Exhausted {
            attempts: 5,
        }))
        .await
        .unwrap();
    wait_for(&mut events, |e| {
        *e == SyncEvent::ReconnectExhausted { attempts: 5 }
    })
    .await;
    assert_eq!(
        client.view().connection,
        Some(ConnectionState::Exhausted { attempts: 5 })
    );
}

// ════════════════════════════════════════════════════════════════════
// Shutdown
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn shutdown_emits_stopped_last() {
    let (mut client, mut events, _script, _host) = start_pull();
    client.shutdown().await;

    let mut last = None;
    while let Some(event) = events.recv().await {
        last = Some(event);
    }
    assert_eq!(last, Some(SyncEvent::Stopped));
    assert!(!client.is_running());
    assert!(matches!(client.flip().await, Err(SyncError::NotConnected)));
    assert!(matches!(
        client.open_game(GAME).await,
        Err(SyncError::NotConnected)
    ));

    // Double shutdown is harmless.
    client.shutdown().await;
}

#[tokio::test]
async fn dropping_the_client_stops_the_engine() {
    let (client, mut events, _script, _host) = start_pull();
    drop(client);
    while events.recv().await.is_some() {}
}
