use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::{Duration, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use wire::{BookingRequest, Space, USER_ID_HEADER};

use super::*;
use crate::config::AppConfig;
use crate::services::booking;
use crate::services::store::MemoryBookingStore;
use crate::state::test_helpers::{
    sample_space, serve, serve_router, test_app_state, test_app_state_with_config, test_config,
};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}/ws")).await.expect("ws connect");
    ws
}

async fn next_message(ws: &mut Client) -> ServerMessage {
    loop {
        let frame = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("ws receive timed out")
            .expect("ws stream ended")
            .expect("ws error");
        match frame {
            WsMessage::Text(text) => return wire::decode_server_message(text.as_str()).expect("decode"),
            WsMessage::Close(_) => panic!("ws closed unexpectedly"),
            _ => {}
        }
    }
}

async fn assert_no_message(ws: &mut Client) {
    assert!(timeout(Duration::from_millis(150), ws.next()).await.is_err(), "expected no message");
}

async fn post_booking(addr: SocketAddr, user: &str, space_id: i64) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("http://{addr}/api/bookings"))
        .header(USER_ID_HEADER, user)
        .json(&BookingRequest { space_id, start_time: None, end_time: None })
        .send()
        .await
        .expect("post booking")
}

fn seats_of(spaces: &[Space], space_id: i64) -> i32 {
    spaces.iter().find(|s| s.id == space_id).map(|s| s.available_seats).expect("space present")
}

// =============================================================================
// INBOUND CLASSIFICATION
// =============================================================================

#[test]
fn classify_inbound_recognizes_hint() {
    let text = r#"{"type":"HINT","spaceId":3,"availableSeats":1}"#;
    assert_eq!(classify_inbound(text), Inbound::Hint { space_id: 3, available_seats: 1 });
}

#[test]
fn classify_inbound_drops_unknown_and_garbage() {
    assert_eq!(classify_inbound(r#"{"type":"UPDATE_AVAILABILITY","data":{}}"#), Inbound::Malformed);
    assert_eq!(classify_inbound("{{{"), Inbound::Malformed);
    assert_eq!(classify_inbound(""), Inbound::Malformed);
}

// =============================================================================
// END TO END
// =============================================================================

#[tokio::test]
async fn snapshot_after_prior_changes_has_no_duplicate_deltas() {
    let state = test_app_state(vec![sample_space(1, 20, 20), sample_space(2, 5, 5)]);
    for _ in 0..5 {
        state.registry.apply_seat_delta(1, -1).await.unwrap();
    }
    let addr = serve(state.clone()).await;

    let mut ws = connect(addr).await;
    let ServerMessage::Snapshot { version, spaces } = next_message(&mut ws).await else {
        panic!("first message must be a snapshot");
    };
    assert_eq!(version, 5);
    assert_eq!(seats_of(&spaces, 1), 15);
    assert_no_message(&mut ws).await;

    state.registry.apply_seat_delta(2, -1).await.unwrap();
    let delta = next_message(&mut ws).await;
    assert_eq!(delta.version(), 6);
}

#[tokio::test]
async fn booking_sends_delta_to_every_open_connection() {
    let state = test_app_state(vec![sample_space(1, 10, 3)]);
    let addr = serve(state).await;

    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    assert!(matches!(next_message(&mut a).await, ServerMessage::Snapshot { version: 0, .. }));
    assert!(matches!(next_message(&mut b).await, ServerMessage::Snapshot { version: 0, .. }));

    let response = post_booking(addr, "user-a", 1).await;
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);

    for ws in [&mut a, &mut b] {
        let ServerMessage::Delta { version, spaces } = next_message(ws).await else {
            panic!("expected delta");
        };
        assert_eq!(version, 1);
        assert_eq!(spaces.len(), 1);
        assert_eq!(spaces[0].available_seats, 2);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn versions_are_strictly_increasing_per_connection() {
    let state = test_app_state(vec![sample_space(1, 30, 30), sample_space(2, 30, 30)]);
    let addr = serve(state.clone()).await;
    let mut ws = connect(addr).await;
    let mut last = next_message(&mut ws).await.version();

    let mut tasks = Vec::new();
    for i in 0..20_i64 {
        let state = state.clone();
        tasks.push(tokio::spawn(async move {
            let now = time::OffsetDateTime::now_utc();
            booking::book(&state, i % 2 + 1, "user", now, now + time::Duration::hours(1)).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    for _ in 0..20 {
        let version = next_message(&mut ws).await.version();
        assert!(version > last, "version {version} did not follow {last}");
        last = version;
    }
    assert_eq!(last, 20);
}

#[tokio::test]
async fn hint_and_garbage_never_mutate_registry() {
    let state = test_app_state(vec![sample_space(1, 10, 5)]);
    let addr = serve(state.clone()).await;
    let mut ws = connect(addr).await;
    let _ = next_message(&mut ws).await;

    let hint = wire::encode_message(&ClientMessage::Hint { space_id: 1, available_seats: 0 }).unwrap();
    ws.send(WsMessage::Text(hint.into())).await.unwrap();
    ws.send(WsMessage::Text("not json".to_owned().into())).await.unwrap();
    assert_no_message(&mut ws).await;

    assert_eq!(state.registry.version().await, 0);
    assert_eq!(state.registry.get(1).await.unwrap().available_seats, 5);

    state.registry.apply_seat_delta(1, -1).await.unwrap();
    assert_eq!(next_message(&mut ws).await.version(), 1, "connection stays open after ignored input");
}

#[tokio::test]
async fn client_close_deregisters_connection() {
    let state = test_app_state(vec![sample_space(1, 10, 5)]);
    let addr = serve(state.clone()).await;
    let mut ws = connect(addr).await;
    let _ = next_message(&mut ws).await;
    assert_eq!(state.hub.connection_count().await, 1);

    ws.close(None).await.unwrap();
    timeout(Duration::from_secs(2), async {
        while state.hub.connection_count().await > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection should deregister");
}

#[tokio::test]
async fn hub_close_ends_socket() {
    let state = test_app_state(vec![sample_space(1, 10, 5)]);
    let addr = serve(state.clone()).await;
    let mut ws = connect(addr).await;
    let _ = next_message(&mut ws).await;

    assert_eq!(state.hub.close_all().await, 1);
    let ended = timeout(Duration::from_secs(2), async {
        loop {
            match ws.next().await {
                None | Some(Err(_) | Ok(WsMessage::Close(_))) => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "socket should close after hub removal");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stalled_reader_is_closed_and_deregistered() {
    let config = AppConfig {
        ws_idle_timeout: Duration::from_millis(300),
        ws_ping_interval: Duration::from_secs(60),
        hub_queue_capacity: 1024,
        ..test_config()
    };
    let mut space = sample_space(1, 10, 5);
    space.name = "x".repeat(256 * 1024);
    let state = test_app_state_with_config(vec![space], Arc::new(MemoryBookingStore::new()), config);
    let addr = serve(state.clone()).await;

    let mut ws = connect(addr).await;
    assert!(matches!(next_message(&mut ws).await, ServerMessage::Snapshot { .. }));
    assert_eq!(state.hub.tracked().await, 1);

    // The client stops reading here; each delta carries the oversized space.
    for i in 0..128 {
        let delta = if i % 2 == 0 { -1 } else { 1 };
        state.registry.apply_seat_delta(1, delta).await.unwrap();
    }

    timeout(Duration::from_secs(5), async {
        while state.hub.tracked().await > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("stalled connection should be deregistered");
    drop(ws);
}

// =============================================================================
// SYNC AGENT CONVERGENCE
// =============================================================================

fn fast_agent_config(addr: SocketAddr) -> cli::agent::AgentConfig {
    cli::agent::AgentConfig {
        connect_timeout: Duration::from_secs(1),
        min_backoff: Duration::from_millis(20),
        max_backoff: Duration::from_millis(100),
        poll_interval: Duration::from_millis(50),
        ..cli::agent::AgentConfig::new(format!("http://{addr}"))
    }
}

async fn wait_for(
    rx: &mut tokio::sync::watch::Receiver<cli::agent::SyncState>,
    pred: impl Fn(&cli::agent::SyncState) -> bool,
) {
    timeout(Duration::from_secs(5), async {
        loop {
            if pred(&*rx.borrow_and_update()) {
                return;
            }
            rx.changed().await.expect("agent stopped");
        }
    })
    .await
    .expect("agent did not reach expected state");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn agent_converges_after_connection_loss() {
    let state = test_app_state(vec![sample_space(1, 10, 10), sample_space(2, 4, 4)]);
    let addr = serve(state.clone()).await;

    let agent = cli::agent::spawn(fast_agent_config(addr)).expect("spawn agent");
    let mut rx = agent.subscribe();
    wait_for(&mut rx, cli::agent::SyncState::connected).await;

    state.registry.apply_seat_delta(1, -3).await.unwrap();
    let (expected, _) = state.registry.get_all().await;
    wait_for(&mut rx, |s| s.spaces() == expected).await;

    state.hub.close_all().await;
    state.registry.apply_seat_delta(2, -4).await.unwrap();
    state.registry.apply_seat_delta(1, 1).await.unwrap();
    let (expected, version) = state.registry.get_all().await;

    wait_for(&mut rx, |s| s.connected() && s.version() == Some(version) && s.spaces() == expected).await;
    assert_eq!(agent.get_by_id(2).map(|s| s.available_seats), Some(0));
}

#[tokio::test]
async fn agent_falls_back_to_pull_without_live_channel() {
    let state = test_app_state(vec![sample_space(1, 10, 7)]);
    state.registry.apply_seat_delta(1, -2).await.unwrap();
    let router = axum::Router::new()
        .route("/api/spaces", axum::routing::get(crate::routes::spaces::list_spaces))
        .with_state(state.clone());
    let addr = serve_router(router).await;

    let agent = cli::agent::spawn(fast_agent_config(addr)).expect("spawn agent");
    let mut rx = agent.subscribe();
    wait_for(&mut rx, |s| !s.connected() && s.version() == Some(1)).await;

    let snapshot = agent.snapshot();
    assert_eq!(snapshot.spaces()[0].available_seats, 5);
    assert!(!agent.report_local_change(1, 4), "hints are not sent while disconnected");
}
