//! Integration tests for two-party room signaling over WebSocket.
//!
//! Tests room creation, offerer assignment, capacity rejection, relaying of
//! offers/answers/candidates, leave and disconnect notifications, and the
//! silent handling of stale or malformed input.
//!
//! Verification command: `cargo test --test signaling_flow`

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pairlink_proto::room::RoomKey;
use pairlink_proto::signal::{
    self, CandidateSignal, ClientEvent, ServerEvent, SessionDescription,
};
use pairlink_relay::relay::{RelayState, start_server, start_server_with_state};
use serde_json::json;
use tokio_tungstenite::tungstenite;

// =============================================================================
// Type aliases and helpers
// =============================================================================

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// How long to wait before concluding that no event is coming.
const QUIET_PERIOD: Duration = Duration::from_millis(200);

/// Starts a relay server on a random port for testing.
async fn start_relay() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    start_server("127.0.0.1:0")
        .await
        .expect("failed to start test relay")
}

/// Starts a relay server whose state the test can inspect.
async fn start_relay_with_state() -> (std::net::SocketAddr, Arc<RelayState>) {
    let state = Arc::new(RelayState::new());
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start test relay");
    (addr, state)
}

/// Opens a WebSocket connection to the relay.
async fn connect(addr: std::net::SocketAddr) -> WsStream {
    let url = format!("ws://{addr}/ws");
    let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    ws
}

/// Sends a client event as a text frame.
async fn send(ws: &mut WsStream, event: &ClientEvent) {
    let text = signal::encode_client(event).unwrap();
    ws.send(tungstenite::Message::text(text)).await.unwrap();
}

/// Receives and decodes the next server event.
async fn recv(ws: &mut WsStream) -> ServerEvent {
    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("recv timed out")
        .unwrap()
        .unwrap();
    signal::decode_server(&msg.into_data()).unwrap()
}

/// Asserts that nothing arrives within the quiet period.
async fn assert_silent(ws: &mut WsStream) {
    if let Ok(Some(Ok(msg))) = tokio::time::timeout(QUIET_PERIOD, ws.next()).await {
        panic!("expected no event, got {msg:?}");
    }
}

fn join(key: &str) -> ClientEvent {
    ClientEvent::Join(key.to_string())
}

fn leave(key: &str) -> ClientEvent {
    ClientEvent::Leave(key.to_string())
}

fn offer(key: &str, sdp: serde_json::Value) -> ClientEvent {
    ClientEvent::Offer(SessionDescription {
        sdp,
        room_key: key.to_string(),
    })
}

fn answer(key: &str, sdp: serde_json::Value) -> ClientEvent {
    ClientEvent::Answer(SessionDescription {
        sdp,
        room_key: key.to_string(),
    })
}

fn candidate(key: &str, candidate: serde_json::Value) -> ClientEvent {
    ClientEvent::Candidate(CandidateSignal {
        candidate,
        room_key: key.to_string(),
    })
}

/// Connects two peers and pairs them in `key`, consuming the join events.
async fn paired(addr: std::net::SocketAddr, key: &str) -> (WsStream, WsStream) {
    let mut first = connect(addr).await;
    let mut second = connect(addr).await;

    send(&mut first, &join(key)).await;
    assert_eq!(recv(&mut first).await, ServerEvent::Created);
    send(&mut second, &join(key)).await;
    assert_eq!(recv(&mut second).await, ServerEvent::CreateOffer);
    assert_eq!(recv(&mut first).await, ServerEvent::PeerJoined);

    (first, second)
}

// =============================================================================
// Room lifecycle
// =============================================================================

/// The full rendezvous: create, join, reject a third, relay, disconnect.
#[tokio::test]
async fn full_rendezvous_scenario() {
    let (addr, state) = start_relay_with_state().await;
    let r1 = RoomKey::parse("r1").unwrap();

    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    let mut c = connect(addr).await;

    send(&mut a, &join("r1")).await;
    assert_eq!(recv(&mut a).await, ServerEvent::Created);

    send(&mut b, &join("r1")).await;
    assert_eq!(recv(&mut b).await, ServerEvent::CreateOffer);
    assert_eq!(recv(&mut a).await, ServerEvent::PeerJoined);

    send(&mut c, &join("r1")).await;
    assert_eq!(recv(&mut c).await, ServerEvent::RoomFull);
    assert_eq!(state.room_members(&r1).len(), 2);

    let payload = json!({"type": "offer", "sdp": "v=0\r\no=- 4611 2 IN IP4 127.0.0.1\r\ns=-\r\n"});
    send(&mut b, &offer("r1", payload.clone())).await;
    assert_eq!(recv(&mut a).await, ServerEvent::Offer(payload));

    a.close(None).await.unwrap();
    assert_eq!(recv(&mut b).await, ServerEvent::PeerLeft);
    assert_eq!(state.room_members(&r1).len(), 1);

    send(&mut b, &offer("r1", json!("nobody listening"))).await;
    assert_silent(&mut b).await;
    assert_silent(&mut c).await;
}

/// First joiner hears only `created`; nobody else hears anything.
#[tokio::test]
async fn first_join_only_informs_joiner() {
    let (addr, _handle) = start_relay().await;
    let mut a = connect(addr).await;
    let mut bystander = connect(addr).await;

    send(&mut a, &join("lobby")).await;
    assert_eq!(recv(&mut a).await, ServerEvent::Created);
    assert_silent(&mut a).await;
    assert_silent(&mut bystander).await;
}

/// A peer that left can no longer be reached; the remaining member can be
/// paired again and the newcomer becomes the offerer.
#[tokio::test]
async fn freed_seat_is_reusable() {
    let (addr, _handle) = start_relay().await;
    let (mut a, mut b) = paired(addr, "r1").await;

    send(&mut b, &leave("r1")).await;
    assert_eq!(recv(&mut a).await, ServerEvent::PeerLeft);

    // Leaving twice notifies nobody.
    send(&mut b, &leave("r1")).await;
    assert_silent(&mut a).await;

    let mut c = connect(addr).await;
    send(&mut c, &join("r1")).await;
    assert_eq!(recv(&mut c).await, ServerEvent::CreateOffer);
    assert_eq!(recv(&mut a).await, ServerEvent::PeerJoined);
    assert_silent(&mut b).await;
}

/// Rooms are keyed on the trimmed key.
#[tokio::test]
async fn room_keys_are_trimmed() {
    let (addr, _handle) = start_relay().await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;

    send(&mut a, &join("  standup ")).await;
    assert_eq!(recv(&mut a).await, ServerEvent::Created);
    send(&mut b, &join("standup")).await;
    assert_eq!(recv(&mut b).await, ServerEvent::CreateOffer);
    assert_eq!(recv(&mut a).await, ServerEvent::PeerJoined);
}

/// Different room keys never interfere with each other.
#[tokio::test]
async fn rooms_are_isolated() {
    let (addr, _handle) = start_relay().await;
    let (mut a, mut b) = paired(addr, "r1").await;
    let (mut c, mut d) = paired(addr, "r2").await;

    send(&mut a, &offer("r1", json!("for b"))).await;
    assert_eq!(recv(&mut b).await, ServerEvent::Offer(json!("for b")));

    c.close(None).await.unwrap();
    assert_eq!(recv(&mut d).await, ServerEvent::PeerLeft);
    assert_silent(&mut a).await;
    assert_silent(&mut b).await;
}

// =============================================================================
// Relaying
// =============================================================================

/// A complete offer/answer/candidate exchange reaches the right peer once.
#[tokio::test]
async fn negotiation_messages_relayed_both_ways() {
    let (addr, _handle) = start_relay().await;
    let (mut creator, mut offerer) = paired(addr, "call").await;

    let sdp_offer = json!({"type": "offer", "sdp": "v=0\r\na=group:BUNDLE 0 1\r\n"});
    send(&mut offerer, &offer("call", sdp_offer.clone())).await;
    assert_eq!(recv(&mut creator).await, ServerEvent::Offer(sdp_offer));

    let sdp_answer = json!({"type": "answer", "sdp": "v=0\r\na=setup:active\r\n"});
    send(&mut creator, &answer("call", sdp_answer.clone())).await;
    assert_eq!(recv(&mut offerer).await, ServerEvent::Answer(sdp_answer));

    let ice = json!({
        "candidate": "candidate:842163049 1 udp 1677729535 203.0.113.7 61665 typ srflx",
        "sdpMid": "0",
        "sdpMLineIndex": 0,
        "usernameFragment": null
    });
    send(&mut offerer, &candidate("call", ice.clone())).await;
    send(&mut creator, &candidate("call", ice.clone())).await;
    assert_eq!(recv(&mut creator).await, ServerEvent::Candidate(ice.clone()));
    assert_eq!(recv(&mut offerer).await, ServerEvent::Candidate(ice));

    assert_silent(&mut creator).await;
    assert_silent(&mut offerer).await;
}

/// Binary frames carrying the same JSON are accepted.
#[tokio::test]
async fn binary_frames_accepted() {
    let (addr, _handle) = start_relay().await;
    let mut a = connect(addr).await;

    let text = signal::encode_client(&join("r1")).unwrap();
    a.send(tungstenite::Message::binary(text.into_bytes()))
        .await
        .unwrap();
    assert_eq!(recv(&mut a).await, ServerEvent::Created);
}

/// A connection outside the room still reaches every member with a relay.
#[tokio::test]
async fn relay_from_outside_room_reaches_members() {
    let (addr, _handle) = start_relay().await;
    let (mut a, mut b) = paired(addr, "r1").await;
    let mut outsider = connect(addr).await;

    send(&mut outsider, &offer("r1", json!("P"))).await;
    assert_eq!(recv(&mut a).await, ServerEvent::Offer(json!("P")));
    assert_eq!(recv(&mut b).await, ServerEvent::Offer(json!("P")));
    assert_silent(&mut outsider).await;
}

/// Browser clients that name the room `roomId` are understood.
#[tokio::test]
async fn room_id_field_accepted_on_relays() {
    let (addr, _handle) = start_relay().await;
    let (mut a, mut b) = paired(addr, "r1").await;

    b.send(tungstenite::Message::text(
        r#"{"event":"candidate","data":{"candidate":{"sdpMid":"0"},"roomId":"r1"}}"#,
    ))
    .await
    .unwrap();
    assert_eq!(
        recv(&mut a).await,
        ServerEvent::Candidate(json!({"sdpMid": "0"}))
    );
}

// =============================================================================
// Stale and malformed input
// =============================================================================

/// Empty keys, garbage frames and unknown events are ignored without
/// closing the connection.
#[tokio::test]
async fn bad_input_is_ignored() {
    let (addr, _handle) = start_relay().await;
    let mut a = connect(addr).await;

    send(&mut a, &join("   ")).await;
    a.send(tungstenite::Message::text("definitely not json"))
        .await
        .unwrap();
    a.send(tungstenite::Message::text(r#"{"event":"wave","data":"r1"}"#))
        .await
        .unwrap();
    send(&mut a, &offer("never-joined", json!("sdp"))).await;
    assert_silent(&mut a).await;

    // Still usable afterwards.
    send(&mut a, &join("r1")).await;
    assert_eq!(recv(&mut a).await, ServerEvent::Created);
}

/// A connection that never joined can come and go silently.
#[tokio::test]
async fn disconnect_without_room_is_silent() {
    let (addr, state) = start_relay_with_state().await;
    let (mut a, mut b) = paired(addr, "r1").await;

    let mut drifter = connect(addr).await;
    drifter.close(None).await.unwrap();

    assert_silent(&mut a).await;
    assert_silent(&mut b).await;
    assert_eq!(state.room_members(&RoomKey::parse("r1").unwrap()).len(), 2);
}

/// Both members dropping empties the room without stray notifications.
#[tokio::test]
async fn both_members_disconnecting_empties_room() {
    let (addr, state) = start_relay_with_state().await;
    let (mut a, b) = paired(addr, "r1").await;

    drop(b);
    assert_eq!(recv(&mut a).await, ServerEvent::PeerLeft);
    a.close(None).await.unwrap();

    let r1 = RoomKey::parse("r1").unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !state.room_members(&r1).is_empty() || state.connection_count() != 0 {
        assert!(tokio::time::Instant::now() < deadline, "room never emptied");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Closing all connections from the server side releases every seat.
#[tokio::test]
async fn close_all_connections_releases_rooms() {
    let (addr, state) = start_relay_with_state().await;
    let (mut a, mut b) = paired(addr, "r1").await;

    state.close_all_connections();

    for ws in [&mut a, &mut b] {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("close frame timed out");
        assert!(
            matches!(msg, Some(Ok(tungstenite::Message::Close(_))) | Some(Err(_)) | None),
            "expected close, got {msg:?}"
        );
        // Drive the closing handshake to completion.
        while let Ok(Some(Ok(_))) = tokio::time::timeout(QUIET_PERIOD, ws.next()).await {}
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while state.connection_count() != 0 {
        assert!(tokio::time::Instant::now() < deadline, "connections never released");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
