// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Line-oriented JSON-RPC client for the daemon's control socket.

use std::path::PathBuf;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use wormhole::config::default_control_socket;
use wormhole::control::{ControlRequest, ControlResponse};

pub struct ControlClient {
    path: PathBuf,
}

impl ControlClient {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path: path.unwrap_or_else(default_control_socket) }
    }

    /// Send one request and return its result value.
    pub async fn call(&self, request: &ControlRequest) -> anyhow::Result<serde_json::Value> {
        let stream = UnixStream::connect(&self.path).await.with_context(|| {
            format!(
                "failed to connect to {} (is wormholed running?)",
                self.path.display()
            )
        })?;
        let (read_half, mut write_half) = stream.into_split();

        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        write_half.write_all(line.as_bytes()).await?;

        let mut lines = BufReader::new(read_half).lines();
        let reply = lines
            .next_line()
            .await?
            .context("daemon closed the control socket without replying")?;
        let response: ControlResponse = serde_json::from_str(&reply)
            .with_context(|| format!("malformed control response: {reply}"))?;

        if let Some(error) = response.error {
            anyhow::bail!("{}: {}", error.code, error.message);
        }
        Ok(response.result.unwrap_or(serde_json::Value::Null))
    }
}
