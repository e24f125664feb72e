// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `wormholed` binary and drive
//! it over the WebSocket transport and the control socket.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;

use wormhole::protocol::SessionInfo;
use wormhole_specs::WormholeProcess;

const TIMEOUT: Duration = Duration::from_secs(10);

async fn ws_recv(
    rx: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin),
) -> anyhow::Result<serde_json::Value> {
    loop {
        let msg = tokio::time::timeout(TIMEOUT, rx.next())
            .await
            .map_err(|_| anyhow::anyhow!("ws recv timeout"))?
            .ok_or_else(|| anyhow::anyhow!("ws stream closed"))?
            .map_err(|e| anyhow::anyhow!("ws recv: {e}"))?;
        if let Message::Text(text) = msg {
            return Ok(serde_json::from_str(&text)?);
        }
    }
}

#[tokio::test]
async fn handshake_against_the_real_binary() -> anyhow::Result<()> {
    let daemon = WormholeProcess::start()?;
    daemon.wait_ready(TIMEOUT).await?;

    let (stream, _) = tokio_tungstenite::connect_async(daemon.ws_url()).await?;
    let (mut tx, mut rx) = stream.split();

    tx.send(Message::Text(
        json!({"type": "hello", "client_version": "1.0.0", "device_name": "phone-a"})
            .to_string()
            .into(),
    ))
    .await?;

    let welcome = ws_recv(&mut rx).await?;
    assert_eq!(welcome["type"], "welcome");
    assert_eq!(welcome["server_version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(welcome["sessions"], json!([]));
    assert!(welcome["machine_name"].is_string());
    Ok(())
}

#[tokio::test]
async fn open_input_event_flow_and_close() -> anyhow::Result<()> {
    let daemon = WormholeProcess::start()?;
    daemon.wait_ready(TIMEOUT).await?;
    let workdir = daemon.workdir("demo")?;

    // Open through the control plane, as the CLI would.
    let reply = daemon
        .control(&json!({
            "method": "open",
            "params": {"name": "demo", "directory": workdir},
        }))
        .await?;
    assert_eq!(reply["result"]["name"], "demo");

    let reply = daemon.control(&json!({"method": "list"})).await?;
    let sessions: Vec<SessionInfo> = serde_json::from_value(reply["result"].clone())?;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].name, "demo");

    // Subscribe over WebSocket and drive a turn.
    let (stream, _) = tokio_tungstenite::connect_async(daemon.ws_url()).await?;
    let (mut tx, mut rx) = stream.split();
    tx.send(Message::Text(
        json!({"type": "hello", "client_version": "1.0.0", "device_name": "phone-a"})
            .to_string()
            .into(),
    ))
    .await?;
    let welcome = ws_recv(&mut rx).await?;
    assert_eq!(welcome["sessions"][0]["name"], "demo");

    tx.send(Message::Text(
        json!({"type": "subscribe", "sessions": "*"}).to_string().into(),
    ))
    .await?;
    tx.send(Message::Text(
        json!({"type": "input", "session": "demo", "text": "do the thing"})
            .to_string()
            .into(),
    ))
    .await?;

    // The stub driver answers with an assistant message and a result; both
    // arrive as sequenced events (the init event may come first).
    let mut saw_assistant = false;
    let mut saw_result = false;
    let mut last_seq = 0;
    while !(saw_assistant && saw_result) {
        let frame = ws_recv(&mut rx).await?;
        assert_eq!(frame["type"], "event");
        let seq = frame["sequence"]
            .as_u64()
            .ok_or_else(|| anyhow::anyhow!("missing sequence"))?;
        assert!(seq > last_seq, "sequences must increase: {seq} after {last_seq}");
        last_seq = seq;
        match frame["message"]["type"].as_str() {
            Some("assistant") => saw_assistant = true,
            Some("result") => saw_result = true,
            _ => {}
        }
    }

    // Cost from the result is visible in list.
    let reply = daemon.control(&json!({"method": "list"})).await?;
    let sessions: Vec<SessionInfo> = serde_json::from_value(reply["result"].clone())?;
    assert!(sessions[0].cost_usd > 0.0);

    let reply = daemon
        .control(&json!({"method": "close", "params": {"name": "demo"}}))
        .await?;
    assert!(reply["error"].is_null());

    let reply = daemon.control(&json!({"method": "list"})).await?;
    assert_eq!(reply["result"], json!([]));
    Ok(())
}

#[tokio::test]
async fn resolve_attach_reports_the_stub_session_id() -> anyhow::Result<()> {
    let daemon = WormholeProcess::start()?;
    daemon.wait_ready(TIMEOUT).await?;
    let workdir = daemon.workdir("attach")?;

    daemon
        .control(&json!({
            "method": "open",
            "params": {"name": "attach-me", "directory": workdir},
        }))
        .await?;

    // The stub announces its id asynchronously; poll until captured.
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        let reply = daemon
            .control(&json!({"method": "resolve_attach", "params": {"name": "attach-me"}}))
            .await?;
        if reply["result"]["driver_session_id"] == "stub-session" {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("driver session id never surfaced: {reply}");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    Ok(())
}

#[tokio::test]
async fn duplicate_directory_is_refused_end_to_end() -> anyhow::Result<()> {
    let daemon = WormholeProcess::start()?;
    daemon.wait_ready(TIMEOUT).await?;
    let workdir = daemon.workdir("conflict")?;

    daemon
        .control(&json!({
            "method": "open",
            "params": {"name": "s1", "directory": workdir},
        }))
        .await?;
    let reply = daemon
        .control(&json!({
            "method": "open",
            "params": {"name": "s2", "directory": workdir},
        }))
        .await?;
    assert_eq!(reply["error"]["code"], "SESSION_EXISTS");
    assert_eq!(
        reply["error"]["message"],
        "A session already exists in this directory: s1"
    );
    Ok(())
}
