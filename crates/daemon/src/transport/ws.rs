// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket client endpoint: handshake, dispatch loop, and the forwarding
//! half of each client's outbound queue.
//!
//! The first frame on a connection must be `hello`; anything else closes the
//! connection with a protocol error. After the `welcome` snapshot the
//! endpoint runs a select loop that drains the client's hub queue, routes
//! inbound frames, and reacts to backpressure cancellation.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::debug;

use crate::error::ErrorCode;
use crate::hub::ClientHandle;
use crate::protocol::{error_frame, ClientFrame, ServerFrame};
use crate::transport::state::Store;

/// WebSocket upgrade handler.
pub async fn ws_handler(
    State(store): State<Arc<Store>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(store, socket))
}

/// Per-connection lifecycle: handshake, welcome, dispatch loop, cleanup.
async fn handle_connection(store: Arc<Store>, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // 1. Handshake: the first frame must be `hello`.
    let first = match next_text(&mut ws_rx).await {
        Some(text) => text,
        None => return,
    };
    let (client_version, device_name) = match serde_json::from_str::<ClientFrame>(&first) {
        Ok(ClientFrame::Hello { client_version, device_name }) => (client_version, device_name),
        _ => {
            let frame =
                error_frame(ErrorCode::InvalidMessage, "expected a hello frame", None);
            let _ = send_json(&mut ws_tx, &frame).await;
            return;
        }
    };

    let (client, mut out_rx) = store.hub.register(&device_name, &client_version);
    debug!(client = client.id, device = %client.device_name, "client connected");

    // 2. Welcome with the current session snapshot (error-state sessions
    //    included).
    let sessions = store.registry.list().iter().map(|s| s.info()).collect();
    client.push(ServerFrame::Welcome {
        server_version: store.settings.server_version.clone(),
        machine_name: store.settings.machine_name.clone(),
        sessions,
    });

    // 3. Dispatch loop.
    loop {
        tokio::select! {
            _ = store.shutdown.cancelled() => break,
            frame = out_rx.recv() => {
                let Some(frame) = frame else { break };
                if send_json(&mut ws_tx, &frame).await.is_err() {
                    break;
                }
            }
            _ = client.cancel.cancelled() => {
                // Queue overflow: final error frame, then disconnect.
                let frame = error_frame(
                    ErrorCode::Backpressure,
                    "outbound queue overflow, disconnecting",
                    None,
                );
                let _ = send_json(&mut ws_tx, &frame).await;
                break;
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(frame) => dispatch(&store, &client, frame).await,
                            Err(e) => {
                                client.push(error_frame(
                                    ErrorCode::InvalidMessage,
                                    &format!("malformed frame: {e}"),
                                    None,
                                ));
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    // Closing drops the subscription; pending permissions this client saw
    // stay live for other clients or session teardown.
    store.hub.unregister(client.id);
    debug!(client = client.id, "client disconnected");
}

/// Route one parsed client frame.
async fn dispatch(store: &Store, client: &Arc<ClientHandle>, frame: ClientFrame) {
    match frame {
        ClientFrame::Hello { .. } => {
            client.push(error_frame(
                ErrorCode::InvalidMessage,
                "hello is only valid as the first frame",
                None,
            ));
        }

        ClientFrame::Subscribe { sessions } => {
            client.subscribe(sessions);
        }

        ClientFrame::Input { session, text } => {
            let Some(target) = store.registry.get(&session) else {
                client.push(unknown_session(&session));
                return;
            };
            if let Err(e) = target.submit_input(&text).await {
                client.push(error_frame(e.code, &e.message, Some(&session)));
            }
        }

        ClientFrame::Control { session, action } => {
            let Some(target) = store.registry.get(&session) else {
                client.push(unknown_session(&session));
                return;
            };
            if let Err(e) = target.control(action).await {
                client.push(error_frame(e.code, &e.message, Some(&session)));
            }
        }

        ClientFrame::PermissionResponse { request_id, decision } => {
            if store.broker.resolve(&request_id, decision).is_err() {
                client.push(error_frame(
                    ErrorCode::InvalidMessage,
                    &format!("unknown request_id: {request_id}"),
                    None,
                ));
            }
        }

        ClientFrame::Sync { session, last_seen_sequence } => {
            if !client.wants(&session) {
                client.push(error_frame(
                    ErrorCode::NotSubscribed,
                    &format!("not subscribed to session: {session}"),
                    Some(&session),
                ));
                return;
            }
            let Some(target) = store.registry.get(&session) else {
                client.push(unknown_session(&session));
                return;
            };
            let (events, truncated) = target.ring.read().sync_from(last_seen_sequence);
            let events = events.iter().map(|e| (**e).clone()).collect();
            let pending = store.broker.pending_for(&session);
            client.push(ServerFrame::SyncResponse { session, events, truncated, pending });
        }
    }
}

fn unknown_session(session: &str) -> ServerFrame {
    error_frame(
        ErrorCode::SessionNotFound,
        &format!("no session named {session}"),
        Some(session),
    )
}

/// Read frames until the first text frame; `None` on close.
async fn next_text(rx: &mut SplitStream<WebSocket>) -> Option<String> {
    loop {
        match rx.next().await? {
            Ok(Message::Text(text)) => return Some(text.to_string()),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

/// Send a JSON-serialized frame over the WebSocket.
async fn send_json(
    tx: &mut SplitSink<WebSocket, Message>,
    frame: &ServerFrame,
) -> Result<(), ()> {
    let text = serde_json::to_string(frame).map_err(|_| ())?;
    tx.send(Message::Text(text.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
