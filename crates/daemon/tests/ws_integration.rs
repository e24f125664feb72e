// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket integration tests using real connections against an in-process
//! axum server.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use wormhole::test_support::{spawn_server, ScriptedRemote, ScriptedSession, StoreBuilder};
use wormhole::transport::Store;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsTx = futures_util::stream::SplitSink<WsStream, WsMessage>;
type WsRx = futures_util::stream::SplitStream<WsStream>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

async fn ws_connect(addr: &std::net::SocketAddr) -> anyhow::Result<(WsTx, WsRx)> {
    let (stream, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .map_err(|e| anyhow::anyhow!("ws connect: {e}"))?;
    Ok(stream.split())
}

async fn ws_send(tx: &mut WsTx, value: &serde_json::Value) -> anyhow::Result<()> {
    let text = serde_json::to_string(value)?;
    tx.send(WsMessage::Text(text.into()))
        .await
        .map_err(|e| anyhow::anyhow!("ws send: {e}"))
}

async fn ws_recv(rx: &mut WsRx) -> anyhow::Result<serde_json::Value> {
    loop {
        let msg = tokio::time::timeout(RECV_TIMEOUT, rx.next())
            .await
            .map_err(|_| anyhow::anyhow!("ws recv timeout"))?
            .ok_or_else(|| anyhow::anyhow!("ws stream closed"))?
            .map_err(|e| anyhow::anyhow!("ws recv: {e}"))?;
        match msg {
            WsMessage::Text(text) => return Ok(serde_json::from_str(&text)?),
            WsMessage::Close(_) => anyhow::bail!("ws closed"),
            _ => {}
        }
    }
}

/// Connect, complete the handshake, and subscribe to everything.
async fn connect_subscribed(
    addr: &std::net::SocketAddr,
) -> anyhow::Result<(WsTx, WsRx, serde_json::Value)> {
    let (mut tx, mut rx) = ws_connect(addr).await?;
    ws_send(
        &mut tx,
        &json!({"type": "hello", "client_version": "1.0.0", "device_name": "phone-a"}),
    )
    .await?;
    let welcome = ws_recv(&mut rx).await?;
    ws_send(&mut tx, &json!({"type": "subscribe", "sessions": "*"})).await?;
    Ok((tx, rx, welcome))
}

async fn open_session(
    store: &Store,
    remote: &mut ScriptedRemote,
    name: &str,
) -> anyhow::Result<ScriptedSession> {
    let directory = std::env::temp_dir().join(format!("wormhole-wsint-{name}"));
    store
        .registry
        .open(Some(name.to_owned()), directory, json!({}))
        .await?;
    remote.next_session().await
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

#[tokio::test]
async fn handshake_returns_welcome_with_empty_sessions() -> anyhow::Result<()> {
    let (store, _remote) = StoreBuilder::new().machine_name("devbox").build();
    let (addr, _server) = spawn_server(store).await?;

    let (mut tx, mut rx) = ws_connect(&addr).await?;
    ws_send(
        &mut tx,
        &json!({"type": "hello", "client_version": "1.0.0", "device_name": "phone-a"}),
    )
    .await?;

    let welcome = ws_recv(&mut rx).await?;
    assert_eq!(welcome["type"], "welcome");
    assert_eq!(welcome["machine_name"], "devbox");
    assert_eq!(welcome["server_version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(welcome["sessions"], json!([]));
    Ok(())
}

#[tokio::test]
async fn non_hello_first_frame_closes_the_connection() -> anyhow::Result<()> {
    let (store, _remote) = StoreBuilder::new().build();
    let (addr, _server) = spawn_server(store).await?;

    let (mut tx, mut rx) = ws_connect(&addr).await?;
    ws_send(&mut tx, &json!({"type": "subscribe", "sessions": "*"})).await?;

    let error = ws_recv(&mut rx).await?;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "INVALID_MESSAGE");

    // The server closes after the protocol error.
    let closed = tokio::time::timeout(RECV_TIMEOUT, async {
        loop {
            match rx.next().await {
                None | Some(Ok(WsMessage::Close(_))) | Some(Err(_)) => break,
                _ => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());
    Ok(())
}

#[tokio::test]
async fn welcome_lists_existing_sessions_including_errored() -> anyhow::Result<()> {
    let (store, mut remote) = StoreBuilder::new().build();
    let scripted = open_session(&store, &mut remote, "broken").await?;
    scripted.kill();

    // Wait until the failure lands.
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    loop {
        let errored = store
            .registry
            .get("broken")
            .map(|s| s.state() == wormhole::session::SessionState::Error)
            .unwrap_or(false);
        if errored {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("session never errored");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let (addr, _server) = spawn_server(store).await?;
    let (_tx, _rx, welcome) = connect_subscribed(&addr).await?;
    assert_eq!(welcome["sessions"][0]["name"], "broken");
    assert_eq!(welcome["sessions"][0]["state"], "error");
    assert_eq!(welcome["sessions"][0]["claude_session_id"], json!(null));
    Ok(())
}

// ---------------------------------------------------------------------------
// Events and sync
// ---------------------------------------------------------------------------

#[tokio::test]
async fn events_stream_in_sequence_order() -> anyhow::Result<()> {
    let (store, mut remote) = StoreBuilder::new().build();
    let (addr, _server) = spawn_server(std::sync::Arc::clone(&store)).await?;
    let scripted = open_session(&store, &mut remote, "demo").await?;
    let (_tx, mut rx, _welcome) = connect_subscribed(&addr).await?;

    for n in 1..=5 {
        scripted.emit(json!({"type": "assistant", "n": n})).await?;
    }
    for expected in 1..=5u64 {
        let event = ws_recv(&mut rx).await?;
        assert_eq!(event["type"], "event");
        assert_eq!(event["session"], "demo");
        assert_eq!(event["sequence"], expected);
        assert_eq!(event["message"]["n"], expected);
    }
    Ok(())
}

#[tokio::test]
async fn sync_returns_the_requested_range() -> anyhow::Result<()> {
    let (store, mut remote) = StoreBuilder::new().build();
    let (addr, _server) = spawn_server(std::sync::Arc::clone(&store)).await?;
    let scripted = open_session(&store, &mut remote, "demo").await?;
    let (mut tx, mut rx, _welcome) = connect_subscribed(&addr).await?;

    for n in 1..=10 {
        scripted.emit(json!({"n": n})).await?;
    }
    for _ in 0..10 {
        ws_recv(&mut rx).await?;
    }

    ws_send(&mut tx, &json!({"type": "sync", "session": "demo", "last_seen_sequence": 7})).await?;
    let response = ws_recv(&mut rx).await?;
    assert_eq!(response["type"], "sync_response");
    assert_eq!(response["session"], "demo");
    assert_eq!(response["truncated"], false);
    let seqs: Vec<u64> = response["events"]
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("events not an array"))?
        .iter()
        .filter_map(|e| e["sequence"].as_u64())
        .collect();
    assert_eq!(seqs, vec![8, 9, 10]);
    Ok(())
}

#[tokio::test]
async fn sync_signals_truncation_below_the_floor() -> anyhow::Result<()> {
    let (store, mut remote) = StoreBuilder::new().ring_capacity(4).build();
    let (addr, _server) = spawn_server(std::sync::Arc::clone(&store)).await?;
    let scripted = open_session(&store, &mut remote, "demo").await?;
    let (mut tx, mut rx, _welcome) = connect_subscribed(&addr).await?;

    for n in 1..=6 {
        scripted.emit(json!({"n": n})).await?;
    }
    for _ in 0..6 {
        ws_recv(&mut rx).await?;
    }

    ws_send(&mut tx, &json!({"type": "sync", "session": "demo", "last_seen_sequence": 0})).await?;
    let response = ws_recv(&mut rx).await?;
    assert_eq!(response["truncated"], true);
    let seqs: Vec<u64> = response["events"]
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("events not an array"))?
        .iter()
        .filter_map(|e| e["sequence"].as_u64())
        .collect();
    assert_eq!(seqs, vec![3, 4, 5, 6]);
    Ok(())
}

// ---------------------------------------------------------------------------
// Permission round-trips
// ---------------------------------------------------------------------------

#[tokio::test]
async fn permission_allow_round_trip() -> anyhow::Result<()> {
    let (store, mut remote) = StoreBuilder::new().build();
    let (addr, _server) = spawn_server(std::sync::Arc::clone(&store)).await?;
    let scripted = open_session(&store, &mut remote, "demo").await?;
    let (mut tx, mut rx, _welcome) = connect_subscribed(&addr).await?;

    let input = json!({"file_path": "a.txt", "content": "x"});
    let decision_fut = scripted.request_permission("Write", input.clone());

    let request = ws_recv(&mut rx).await?;
    assert_eq!(request["type"], "permission_request");
    assert_eq!(request["tool_name"], "Write");
    assert_eq!(request["tool_input"], input);
    assert_eq!(request["session_name"], "demo");
    let request_id = request["request_id"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("missing request_id"))?;

    ws_send(
        &mut tx,
        &json!({"type": "permission_response", "request_id": request_id, "decision": "allow"}),
    )
    .await?;

    let decision = decision_fut.await;
    assert_eq!(
        decision,
        wormhole::driver::PermissionDecision::Allow { updated_input: input }
    );
    Ok(())
}

#[tokio::test]
async fn permission_deny_round_trip() -> anyhow::Result<()> {
    let (store, mut remote) = StoreBuilder::new().build();
    let (addr, _server) = spawn_server(std::sync::Arc::clone(&store)).await?;
    let scripted = open_session(&store, &mut remote, "demo").await?;
    let (mut tx, mut rx, _welcome) = connect_subscribed(&addr).await?;

    let decision_fut = scripted.request_permission("Write", json!({"file_path": "a.txt"}));
    let request = ws_recv(&mut rx).await?;
    let request_id = request["request_id"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("missing request_id"))?;

    ws_send(
        &mut tx,
        &json!({"type": "permission_response", "request_id": request_id, "decision": "deny"}),
    )
    .await?;

    assert_eq!(
        decision_fut.await,
        wormhole::driver::PermissionDecision::Deny {
            message: "User denied".to_owned(),
            interrupt: false,
        }
    );
    Ok(())
}

#[tokio::test]
async fn any_subscribed_client_may_answer() -> anyhow::Result<()> {
    let (store, mut remote) = StoreBuilder::new().build();
    let (addr, _server) = spawn_server(std::sync::Arc::clone(&store)).await?;
    let scripted = open_session(&store, &mut remote, "demo").await?;

    let (_tx_a, mut rx_a, _welcome) = connect_subscribed(&addr).await?;
    let (mut tx_b, mut rx_b, _welcome) = connect_subscribed(&addr).await?;

    let decision_fut = scripted.request_permission("Bash", json!({"command": "ls"}));

    // Both clients observe the request; the second one answers.
    let request_a = ws_recv(&mut rx_a).await?;
    let request_b = ws_recv(&mut rx_b).await?;
    assert_eq!(request_a["request_id"], request_b["request_id"]);

    let request_id = request_b["request_id"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("missing request_id"))?;
    ws_send(
        &mut tx_b,
        &json!({"type": "permission_response", "request_id": request_id, "decision": "allow"}),
    )
    .await?;

    assert!(matches!(
        decision_fut.await,
        wormhole::driver::PermissionDecision::Allow { .. }
    ));
    Ok(())
}

// ---------------------------------------------------------------------------
// Error handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_frames_keep_the_connection_open() -> anyhow::Result<()> {
    let (store, _remote) = StoreBuilder::new().build();
    let (addr, _server) = spawn_server(store).await?;
    let (mut tx, mut rx, _welcome) = connect_subscribed(&addr).await?;

    tx.send(WsMessage::Text("{not json".to_owned().into()))
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    let error = ws_recv(&mut rx).await?;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "INVALID_MESSAGE");

    ws_send(&mut tx, &json!({"type": "unknown_frame_kind"})).await?;
    let error = ws_recv(&mut rx).await?;
    assert_eq!(error["code"], "INVALID_MESSAGE");

    // Still alive: a valid frame round-trips.
    ws_send(&mut tx, &json!({"type": "sync", "session": "nope", "last_seen_sequence": 0})).await?;
    let error = ws_recv(&mut rx).await?;
    assert_eq!(error["code"], "SESSION_NOT_FOUND");
    Ok(())
}

#[tokio::test]
async fn input_to_an_errored_session_is_rejected() -> anyhow::Result<()> {
    let (store, mut remote) = StoreBuilder::new().build();
    let (addr, _server) = spawn_server(std::sync::Arc::clone(&store)).await?;
    let scripted = open_session(&store, &mut remote, "demo").await?;
    let (mut tx, mut rx, _welcome) = connect_subscribed(&addr).await?;

    scripted.kill();
    // Failure surfaces as an error event plus a DRIVER_ERROR frame.
    let first = ws_recv(&mut rx).await?;
    let second = ws_recv(&mut rx).await?;
    let kinds: Vec<&str> = [&first, &second]
        .iter()
        .filter_map(|v| v["type"].as_str())
        .collect();
    assert!(kinds.contains(&"event"));
    assert!(kinds.contains(&"error"));

    ws_send(&mut tx, &json!({"type": "input", "session": "demo", "text": "hi"})).await?;
    let error = ws_recv(&mut rx).await?;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "DRIVER_ERROR");
    assert_eq!(error["session"], "demo");
    Ok(())
}
