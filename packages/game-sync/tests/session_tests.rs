mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{eventually, test_config, wait_until, within};
use game_sync::domain::{GameSnapshot, PhaseSnapshot};
use game_sync::http::etag::game_etag;
use game_sync::http::SnapshotFetch;
use game_sync::protocol::{ClientMsg, ErrorCode, ServerMsg, Topic};
use game_sync::sync::{
    ApplyOutcome, ErrorSource, GameRoomState, MutationAction, MutationKind, Provenance,
    RefreshOutcome,
};
use game_sync::{ConnectionState, GameSession, SyncError, SyncEvent};
use sync_test_support::fixtures::{
    bidding_snapshot, bidding_snapshot_with_bids, game_state_msg, lobby_snapshot, modified,
};
use sync_test_support::{FakeGameApi, MemoryServer, MemoryTransport, ServerSocket};
use tokio::sync::broadcast;

const GAME: i64 = 42;

struct Harness {
    session: Arc<GameSession>,
    api: Arc<FakeGameApi>,
    server: MemoryServer,
}

fn harness() -> Harness {
    let (transport, server) = MemoryTransport::new();
    let api = FakeGameApi::new();
    let session = GameSession::new(test_config(), api.clone(), Arc::new(transport));
    Harness {
        session: Arc::new(session),
        api,
        server,
    }
}

/// Open `GAME` at `version` and return the socket once the subscribe is on it.
async fn open(h: &mut Harness, version: i32, snapshot: GameSnapshot) -> ServerSocket {
    h.api.push_snapshot(Ok(modified(GAME, version, snapshot)));
    let state = h.session.open_game(GAME).await.unwrap();
    assert_eq!(state.version, version);

    let mut socket = h.server.accept_handshake(7).await;
    assert_eq!(socket.recv().await, subscribe(GAME));
    socket
}

fn subscribe(id: i64) -> ClientMsg {
    ClientMsg::Subscribe {
        topic: Topic::game(id),
    }
}

async fn state_at(h: &Harness, version: i32) -> GameRoomState {
    let mut rx = h.session.watch_state();
    let state = wait_until(&mut rx, |s| s.as_ref().is_some_and(|s| s.version == version)).await;
    state.map(|s| (*s).clone()).unwrap()
}

async fn next_event(events: &mut broadcast::Receiver<SyncEvent>) -> SyncEvent {
    within(events.recv()).await.expect("event channel open")
}

fn bids(state: &GameRoomState) -> [Option<u8>; 4] {
    match &state.snapshot.phase {
        PhaseSnapshot::Bidding(b) => b.bids,
        other => panic!("expected bidding, got {}", other.name()),
    }
}

#[tokio::test]
async fn push_replaces_http_state_without_touching_etag() {
    let mut h = harness();
    let mut events = h.session.events();
    let socket = open(&mut h, 1, lobby_snapshot()).await;

    let loaded = h.session.state().unwrap();
    assert_eq!(loaded.provenance, Provenance::Http);
    assert_eq!(loaded.etag, Some(game_etag(GAME, 1)));

    socket.send(&game_state_msg(GAME, 2, bidding_snapshot()));
    let pushed = state_at(&h, 2).await;
    assert_eq!(pushed.provenance, Provenance::Websocket);
    assert_eq!(pushed.etag, Some(game_etag(GAME, 1)));

    // Stale push, then a marker so we know it was processed
    socket.send(&game_state_msg(GAME, 1, lobby_snapshot()));
    socket.send(&ServerMsg::YourTurn {
        game_id: GAME,
        version: 2,
    });
    assert!(matches!(
        next_event(&mut events).await,
        SyncEvent::YourTurn { game_id: GAME, version: 2 }
    ));
    assert_eq!(h.session.state().unwrap(), pushed);

    h.api.push_snapshot(Ok(SnapshotFetch::NotModified));
    let outcome = h.session.refresh().await.unwrap();
    assert!(matches!(outcome, RefreshOutcome::NotModified));
    assert_eq!(h.api.if_none_match().last().cloned().flatten(), Some(game_etag(GAME, 1)));
    assert_eq!(h.session.state().unwrap(), pushed);
}

#[tokio::test]
async fn pushes_for_other_games_are_ignored() {
    let mut h = harness();
    let socket = open(&mut h, 1, lobby_snapshot()).await;

    socket.send(&game_state_msg(GAME + 1, 9, bidding_snapshot()));
    socket.send(&game_state_msg(GAME, 2, bidding_snapshot()));
    let state = state_at(&h, 2).await;
    assert_eq!(state.game_id, GAME);
}

#[tokio::test(start_paused = true)]
async fn reconnect_resubscribes_before_accepting_pushes() {
    let mut h = harness();
    let mut socket = open(&mut h, 1, lobby_snapshot()).await;
    let mut conn = h.session.watch_connection();

    socket.drop_connection();
    let mut socket = h.server.accept_handshake(7).await;
    assert_eq!(socket.recv().await, subscribe(GAME));
    wait_until(&mut conn, |s| *s == ConnectionState::Connected).await;

    socket.send(&game_state_msg(GAME, 3, bidding_snapshot()));
    let state = state_at(&h, 3).await;
    assert_eq!(state.provenance, Provenance::Websocket);
}

#[tokio::test]
async fn push_error_masked_by_successful_refresh() {
    let mut h = harness();
    let mut events = h.session.events();
    let socket = open(&mut h, 1, lobby_snapshot()).await;

    h.api.push_snapshot(Ok(SnapshotFetch::NotModified));
    socket.send(&ServerMsg::Error {
        code: ErrorCode::BadRequest,
        message: "Transient failure".to_string(),
    });

    match next_event(&mut events).await {
        SyncEvent::PushErrorRecovered { game_id, code } => {
            assert_eq!(game_id, GAME);
            assert_eq!(code, ErrorCode::BadRequest);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(h.session.current_error().is_none());
    assert_eq!(h.api.snapshot_calls(), 2);
}

#[tokio::test]
async fn push_error_surfaced_when_refresh_also_fails() {
    let mut h = harness();
    let mut events = h.session.events();
    let socket = open(&mut h, 1, lobby_snapshot()).await;

    h.api.push_snapshot(Err(SyncError::Http {
        status: 503,
        code: "SERVICE_UNAVAILABLE".to_string(),
        detail: "Backend is restarting".to_string(),
        trace_id: Some("trace-push-1".to_string()),
    }));
    socket.send(&ServerMsg::Error {
        code: ErrorCode::Forbidden,
        message: "Not a member of this game".to_string(),
    });

    let SyncEvent::PushErrorSurfaced(surfaced) = next_event(&mut events).await else {
        panic!("expected surfaced error");
    };
    assert_eq!(surfaced.message, "Not a member of this game");
    assert_eq!(surfaced.trace_id.as_deref(), Some("trace-push-1"));
    assert_eq!(surfaced.source, ErrorSource::Websocket);
    assert_eq!(h.session.current_error(), Some(surfaced));

    // The state we had stays on screen
    assert_eq!(h.session.state().unwrap().version, 1);
}

#[tokio::test]
async fn turn_and_long_wait_notifications_are_forwarded() {
    let mut h = harness();
    let mut events = h.session.events();
    let socket = open(&mut h, 1, bidding_snapshot()).await;

    socket.send(&ServerMsg::YourTurn {
        game_id: GAME,
        version: 1,
    });
    socket.send(&ServerMsg::LongWaitInvalidated { game_id: GAME });

    assert!(matches!(
        next_event(&mut events).await,
        SyncEvent::YourTurn { game_id: GAME, version: 1 }
    ));
    assert!(matches!(
        next_event(&mut events).await,
        SyncEvent::LongWaitInvalidated { game_id: GAME }
    ));
}

#[tokio::test]
async fn bid_is_confirmed_by_push() {
    let mut h = harness();
    let socket = open(&mut h, 1, bidding_snapshot()).await;

    let receipt = h.session.bid(3).await.unwrap();
    assert_eq!(receipt.base_version, 1);
    let optimistic = h.session.state().unwrap();
    assert_eq!(optimistic.provenance, Provenance::Optimistic);
    assert_eq!(bids(&optimistic)[0], Some(3));

    socket.send(&game_state_msg(
        GAME,
        2,
        bidding_snapshot_with_bids([Some(3), None, None, None], 1),
    ));
    let confirmed = state_at(&h, 2).await;
    assert_eq!(confirmed.provenance, Provenance::Websocket);
    assert_eq!(bids(&confirmed)[0], Some(3));

    let (_, request) = h.api.submissions().remove(0);
    assert_eq!(request.action, MutationAction::Bid { bid: 3 });
    assert_eq!(request.lock_version, 1);
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_action_is_reconciled_by_refresh_after_window() {
    let mut h = harness();
    let _socket = open(&mut h, 1, bidding_snapshot()).await;

    h.session.bid(3).await.unwrap();
    assert_eq!(h.session.state().unwrap().provenance, Provenance::Optimistic);

    // The server never applied the bid
    h.api.push_snapshot(Ok(modified(GAME, 1, bidding_snapshot())));
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.api.snapshot_calls(), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    let api = Arc::clone(&h.api);
    eventually(|| api.snapshot_calls() == 2).await;

    let mut rx = h.session.watch_state();
    let state = wait_until(&mut rx, |s| {
        s.as_ref().is_some_and(|s| s.provenance == Provenance::Http)
    })
    .await
    .unwrap();
    assert_eq!(state.version, 1);
    assert_eq!(bids(&state), [None; 4]);
}

#[tokio::test(start_paused = true)]
async fn confirmed_action_skips_the_follow_up_refresh() {
    let mut h = harness();
    let socket = open(&mut h, 1, bidding_snapshot()).await;

    h.session.bid(2).await.unwrap();
    socket.send(&game_state_msg(
        GAME,
        2,
        bidding_snapshot_with_bids([Some(2), None, None, None], 1),
    ));
    state_at(&h, 2).await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.api.snapshot_calls(), 1);
}

#[tokio::test]
async fn results_after_close_are_dropped() {
    let mut h = harness();
    let mut socket = open(&mut h, 1, lobby_snapshot()).await;

    let gate = h.api.gate_snapshots();
    h.api.push_snapshot(Ok(modified(GAME, 5, bidding_snapshot())));
    let session = Arc::clone(&h.session);
    let pending = tokio::spawn(async move { session.refresh().await });
    let api = Arc::clone(&h.api);
    eventually(|| api.snapshot_calls() == 2).await;

    h.session.close_game();
    assert_eq!(
        socket.recv().await,
        ClientMsg::Unsubscribe {
            topic: Topic::game(GAME)
        }
    );
    gate.release(1);

    let outcome = within(pending).await.unwrap().unwrap();
    assert!(matches!(
        outcome,
        RefreshOutcome::Updated(ApplyOutcome::IgnoredOtherResource)
    ));
    assert!(h.session.state().is_none());
    assert!(h.session.displayed_game().is_none());

    // Late pushes for the closed game change nothing either
    socket.send(&game_state_msg(GAME, 6, bidding_snapshot()));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.session.state().is_none());
}

#[tokio::test]
async fn toggle_ready_flips_displayed_flag() {
    let mut h = harness();
    let _socket = open(&mut h, 1, lobby_snapshot()).await;

    h.session.toggle_ready().await.unwrap();
    assert!(h.session.state().unwrap().snapshot.game.seating[0].is_ready);
    assert!(!h.session.is_pending(MutationKind::Ready));

    h.session.toggle_ready().await.unwrap();
    assert!(!h.session.state().unwrap().snapshot.game.seating[0].is_ready);

    let sent: Vec<_> = h
        .api
        .submissions()
        .into_iter()
        .map(|(_, request)| request.action)
        .collect();
    assert_eq!(
        sent,
        vec![
            MutationAction::Ready { is_ready: true },
            MutationAction::Ready { is_ready: false },
        ]
    );
}

#[tokio::test]
async fn actions_need_an_open_game() {
    let h = harness();
    let err = h.session.bid(1).await.unwrap_err();
    assert!(matches!(err, SyncError::NoGameOpen));
    assert!(matches!(h.session.refresh().await, Err(SyncError::NoGameOpen)));
    assert_eq!(h.api.submit_calls(), 0);
}

#[tokio::test]
async fn failed_initial_load_is_returned_and_surfaced() {
    let h = harness();
    h.api.push_snapshot(Err(SyncError::Http {
        status: 404,
        code: "GAME_NOT_FOUND".to_string(),
        detail: "Game not found".to_string(),
        trace_id: Some("trace-404".to_string()),
    }));

    let err = h.session.open_game(GAME).await.unwrap_err();
    assert_eq!(err.code(), "GAME_NOT_FOUND");
    let surfaced = h.session.current_error().unwrap();
    assert_eq!(surfaced.message, "Game not found");
    assert_eq!(surfaced.source, ErrorSource::Http);
    assert_eq!(h.session.displayed_game(), Some(GAME));
}
