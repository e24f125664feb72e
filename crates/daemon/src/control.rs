// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local control socket: line-delimited JSON-RPC over a Unix domain socket,
//! consumed by the `wormhole` CLI. Authenticated by filesystem permissions;
//! never exposed on the network.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{ErrorCode, SessionError};
use crate::transport::Store;

/// One request line from the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum ControlRequest {
    Open {
        #[serde(default)]
        name: Option<String>,
        directory: PathBuf,
        #[serde(default)]
        options: serde_json::Value,
    },
    Close {
        name: String,
    },
    List,
    Status,
    ResolveAttach {
        name: String,
    },
}

/// One response line back to the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ControlError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlError {
    pub code: ErrorCode,
    pub message: String,
}

impl ControlResponse {
    pub fn ok(result: serde_json::Value) -> Self {
        Self { result: Some(result), error: None }
    }

    pub fn error(err: SessionError) -> Self {
        Self {
            result: None,
            error: Some(ControlError { code: err.code, message: err.message }),
        }
    }
}

/// Bind the control socket and spawn its accept loop.
///
/// Binding failure is fatal to daemon startup; the caller propagates it.
pub fn serve(store: Arc<Store>, path: PathBuf) -> anyhow::Result<PathBuf> {
    // Remove a stale socket from a previous run.
    let _ = std::fs::remove_file(&path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let listener = UnixListener::bind(&path)
        .with_context(|| format!("failed to bind control socket {}", path.display()))?;
    info!("control socket listening on {}", path.display());

    let shutdown = store.shutdown.clone();
    let socket_path = path.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accept = listener.accept() => {
                    match accept {
                        Ok((stream, _)) => {
                            tokio::spawn(handle_connection(Arc::clone(&store), stream));
                        }
                        Err(e) => debug!("control socket accept error: {e}"),
                    }
                }
            }
        }
        let _ = std::fs::remove_file(&socket_path);
    });

    Ok(path)
}

/// One request/response per line until the client hangs up.
async fn handle_connection(store: Arc<Store>, stream: UnixStream) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<ControlRequest>(&line) {
            Ok(request) => handle_request(&store, request).await,
            Err(e) => ControlResponse::error(SessionError::new(
                ErrorCode::InvalidMessage,
                format!("malformed request: {e}"),
            )),
        };
        let Ok(mut out) = serde_json::to_string(&response) else { break };
        out.push('\n');
        if write_half.write_all(out.as_bytes()).await.is_err() {
            break;
        }
    }
}

/// Execute one control request against the daemon state.
pub async fn handle_request(store: &Store, request: ControlRequest) -> ControlResponse {
    match request {
        ControlRequest::Open { name, directory, options } => {
            match store.registry.open(name, directory, options).await {
                Ok(session) => ControlResponse::ok(json!({"name": session.name})),
                Err(e) => ControlResponse::error(e),
            }
        }

        ControlRequest::Close { name } => match store.registry.close(&name).await {
            Ok(()) => ControlResponse::ok(json!({})),
            Err(e) => ControlResponse::error(e),
        },

        ControlRequest::List => {
            let infos: Vec<_> = store.registry.list().iter().map(|s| s.info()).collect();
            ControlResponse::ok(serde_json::to_value(infos).unwrap_or_default())
        }

        ControlRequest::Status => ControlResponse::ok(json!({
            "port": store.settings.port,
            "pid": std::process::id(),
            "version": store.settings.server_version,
            "sessions": store.registry.len(),
        })),

        ControlRequest::ResolveAttach { name } => {
            let Some(session) = store.registry.get(&name) else {
                return ControlResponse::error(SessionError::new(
                    ErrorCode::SessionNotFound,
                    format!("no session named {name}"),
                ));
            };
            match session.driver_session_id() {
                Some(id) => ControlResponse::ok(json!({"driver_session_id": id})),
                None => ControlResponse::error(SessionError::new(
                    ErrorCode::DriverError,
                    format!("session {name} has not reported a driver session id yet"),
                )),
            }
        }
    }
}

#[cfg(test)]
#[path = "control_tests.rs"]
mod tests;
