// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `wormholed` binary with a stub driver script and
//! exercises it over the WebSocket transport and the control socket.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

/// Resolve the path to the compiled `wormholed` binary.
pub fn wormholed_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("wormholed")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// Stub driver: announces an init message, then answers every stdin line
/// with an assistant message and a result.
const STUB_DRIVER: &str = r#"#!/bin/sh
echo '{"type":"system","subtype":"init","session_id":"stub-session"}'
while IFS= read -r line; do
  printf '%s\n' '{"type":"assistant","message":{"content":[{"type":"text","text":"ack"}]}}'
  printf '%s\n' '{"type":"result","total_cost_usd":0.01,"usage":{}}'
done
"#;

/// A running `wormholed` process with its scratch directory.
pub struct WormholeProcess {
    child: Child,
    pub port: u16,
    pub control_path: PathBuf,
    scratch: tempfile::TempDir,
}

impl WormholeProcess {
    pub fn start() -> anyhow::Result<Self> {
        let tmp = tempfile::tempdir()?;

        let driver_path = tmp.path().join("driver.sh");
        std::fs::write(&driver_path, STUB_DRIVER)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&driver_path, std::fs::Permissions::from_mode(0o755))?;
        }

        let port = free_port()?;
        let control_path = tmp.path().join("wormholed.sock");
        let child = Command::new(wormholed_binary())
            .args([
                "--config-file=/nonexistent/wormhole.toml".to_owned(),
                "--host=127.0.0.1".to_owned(),
                format!("--port={port}"),
                format!("--control-socket={}", control_path.display()),
                "--discovery-enabled=false".to_owned(),
                format!("--driver-command={}", driver_path.display()),
                "--log-format=text".to_owned(),
                "--log-level=warn".to_owned(),
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()?;

        Ok(Self { child, port, control_path, scratch: tmp })
    }

    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}/ws", self.port)
    }

    /// Scratch directory usable as a session working directory.
    pub fn workdir(&self, name: &str) -> anyhow::Result<PathBuf> {
        let dir = self.scratch.path().join(name);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Poll the control socket until `status` answers.
    pub async fn wait_ready(&self, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Ok(value) = self.control(&serde_json::json!({"method": "status"})).await {
                if value["result"]["port"].is_number() {
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("wormholed never became ready");
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// One control-socket request/response.
    pub async fn control(&self, request: &serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let stream = UnixStream::connect(&self.control_path).await?;
        let (read_half, mut write_half) = stream.into_split();

        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        write_half.write_all(line.as_bytes()).await?;

        let mut lines = BufReader::new(read_half).lines();
        let reply = lines
            .next_line()
            .await?
            .ok_or_else(|| anyhow::anyhow!("control socket closed"))?;
        Ok(serde_json::from_str(&reply)?)
    }
}

impl Drop for WormholeProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
