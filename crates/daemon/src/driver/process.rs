// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subprocess driver adapter.
//!
//! Spawns the configured agent command with the session's working directory
//! and exchanges newline-delimited JSON over stdin/stdout:
//!
//! - child → daemon: one message object per stdout line. Lines of
//!   `type=permission_request` are intercepted and fed through the permission
//!   callback; everything else flows to the session untouched.
//! - daemon → child: `{"type":"user","text":…}` for user turns,
//!   `{"type":"interrupt"}` to cancel a turn, and
//!   `{"type":"permission_decision","request_id":…,"decision":…}` to answer
//!   an intercepted request.
//!
//! Stderr is drained at debug level. On `close` the child's stdin is dropped
//! and the process is killed after a short grace period.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{BoxFuture, Driver, DriverHandle, PermissionCallback, StartedDriver};

const KILL_GRACE: Duration = Duration::from_secs(3);

/// Driver backed by a spawned agent process speaking JSONL on stdio.
pub struct ProcessDriver {
    command: Vec<String>,
}

impl ProcessDriver {
    /// Build from a command vector (program followed by base arguments).
    pub fn new(command: Vec<String>) -> anyhow::Result<Self> {
        if command.is_empty() {
            anyhow::bail!("driver command must not be empty");
        }
        Ok(Self { command })
    }
}

impl Driver for ProcessDriver {
    fn start<'a>(
        &'a self,
        directory: &'a Path,
        options: &'a serde_json::Value,
        permissions: PermissionCallback,
    ) -> BoxFuture<'a, anyhow::Result<StartedDriver>> {
        Box::pin(async move {
            let mut cmd = Command::new(&self.command[0]);
            cmd.args(&self.command[1..]);
            if let Some(extra) = options.get("args").and_then(|v| v.as_array()) {
                for arg in extra.iter().filter_map(|v| v.as_str()) {
                    cmd.arg(arg);
                }
            }
            cmd.current_dir(directory)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            let mut child = cmd
                .spawn()
                .with_context(|| format!("failed to spawn driver command {:?}", self.command))?;
            let stdin = child.stdin.take().context("driver stdin unavailable")?;
            let stdout = child.stdout.take().context("driver stdout unavailable")?;
            let stderr = child.stderr.take().context("driver stderr unavailable")?;

            let cancel = CancellationToken::new();
            let (stdin_tx, stdin_rx) = mpsc::channel::<String>(64);
            let (message_tx, message_rx) = mpsc::channel(256);

            tokio::spawn(write_lines(stdin, stdin_rx, cancel.clone()));
            tokio::spawn(read_lines(
                stdout,
                message_tx,
                permissions,
                stdin_tx.clone(),
                cancel.clone(),
            ));
            tokio::spawn(drain_stderr(stderr));
            tokio::spawn(supervise(child, cancel.clone()));

            Ok(StartedDriver {
                handle: Box::new(ProcessHandle { stdin_tx, cancel }),
                messages: message_rx,
            })
        })
    }
}

struct ProcessHandle {
    stdin_tx: mpsc::Sender<String>,
    cancel: CancellationToken,
}

impl ProcessHandle {
    async fn send_control(&self, value: serde_json::Value) -> anyhow::Result<()> {
        let line = serde_json::to_string(&value)?;
        self.stdin_tx
            .send(line)
            .await
            .map_err(|_| anyhow::anyhow!("driver process is gone"))
    }
}

impl DriverHandle for ProcessHandle {
    fn query(&self, text: String) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.send_control(serde_json::json!({"type": "user", "text": text})).await
        })
    }

    fn interrupt(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move { self.send_control(serde_json::json!({"type": "interrupt"})).await })
    }

    fn close(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.cancel.cancel();
            Ok(())
        })
    }
}

/// Pump daemon → child lines until cancelled or the pipe breaks.
///
/// Dropping `stdin` on exit signals EOF to the child, which is the graceful
/// half of shutdown; [`supervise`] escalates to a kill after the grace.
async fn write_lines(
    mut stdin: ChildStdin,
    mut rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            line = rx.recv() => {
                let Some(mut line) = line else { break };
                line.push('\n');
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    debug!("driver stdin closed");
                    break;
                }
                let _ = stdin.flush().await;
            }
        }
    }
}

/// Pump child → daemon lines, intercepting permission requests.
async fn read_lines(
    stdout: ChildStdout,
    message_tx: mpsc::Sender<serde_json::Value>,
    permissions: PermissionCallback,
    stdin_tx: mpsc::Sender<String>,
    cancel: CancellationToken,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
                    debug!("ignoring non-JSON driver output: {line}");
                    continue;
                };
                if value.get("type").and_then(|v| v.as_str()) == Some("permission_request") {
                    handle_permission(&value, &permissions, &stdin_tx);
                    continue;
                }
                if message_tx.send(value).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!("driver stdout read error: {e}");
                break;
            }
        }
    }
    // message_tx drops here; the session observes end-of-stream.
}

/// Route one intercepted permission request through the callback.
///
/// The callback registers and broadcasts the request synchronously during
/// this call, so the read loop may continue without reordering the request
/// behind later events. Only the decision wait is spawned.
fn handle_permission(
    value: &serde_json::Value,
    permissions: &PermissionCallback,
    stdin_tx: &mpsc::Sender<String>,
) {
    let Some(request_id) = value.get("request_id").and_then(|v| v.as_str()) else {
        warn!("driver permission_request without request_id, dropping");
        return;
    };
    let tool_name = value.get("tool_name").and_then(|v| v.as_str()).unwrap_or("unknown");
    let tool_input = value.get("tool_input").cloned().unwrap_or(serde_json::Value::Null);

    let decision_fut = permissions(tool_name, tool_input);
    let request_id = request_id.to_owned();
    let tx = stdin_tx.clone();
    tokio::spawn(async move {
        let decision = decision_fut.await;
        let reply = serde_json::json!({
            "type": "permission_decision",
            "request_id": request_id,
            "decision": decision,
        });
        if let Ok(line) = serde_json::to_string(&reply) {
            let _ = tx.send(line).await;
        }
    });
}

async fn drain_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("driver stderr: {line}");
    }
}

/// Own the child process: reap it on natural exit, kill it on cancel.
async fn supervise(mut child: Child, cancel: CancellationToken) {
    tokio::select! {
        status = child.wait() => {
            match status {
                Ok(status) => debug!("driver process exited: {status}"),
                Err(e) => warn!("driver process wait failed: {e}"),
            }
        }
        _ = cancel.cancelled() => {
            // Stdin is dropped by the writer on cancel; give the child the
            // grace period to exit on EOF before killing it.
            match tokio::time::timeout(KILL_GRACE, child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
