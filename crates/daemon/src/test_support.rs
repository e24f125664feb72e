// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: a scripted in-process driver, a store
//! builder, and an ephemeral-port server helper.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broker::PermissionBroker;
use crate::driver::{
    BoxFuture, Driver, DriverHandle, PermissionCallback, PermissionFuture, StartedDriver,
};
use crate::hub::Hub;
use crate::registry::Registry;
use crate::transport::{build_router, DaemonSettings, Store};

const TIMEOUT: Duration = Duration::from_secs(5);

/// In-process fake driver. Each `start` call hands the test a
/// [`ScriptedSession`] through the paired [`ScriptedRemote`].
pub struct ScriptedDriver {
    sessions_tx: mpsc::UnboundedSender<ScriptedSession>,
}

/// Test-side receiver of started scripted sessions.
pub struct ScriptedRemote {
    sessions_rx: mpsc::UnboundedReceiver<ScriptedSession>,
}

impl ScriptedDriver {
    pub fn new() -> (Arc<Self>, ScriptedRemote) {
        let (sessions_tx, sessions_rx) = mpsc::unbounded_channel();
        (Arc::new(Self { sessions_tx }), ScriptedRemote { sessions_rx })
    }
}

impl ScriptedRemote {
    /// Wait for the next `start` call.
    pub async fn next_session(&mut self) -> anyhow::Result<ScriptedSession> {
        tokio::time::timeout(TIMEOUT, self.sessions_rx.recv())
            .await
            .map_err(|_| anyhow::anyhow!("timed out waiting for driver start"))?
            .ok_or_else(|| anyhow::anyhow!("scripted driver dropped"))
    }
}

impl Driver for ScriptedDriver {
    fn start<'a>(
        &'a self,
        directory: &'a Path,
        options: &'a serde_json::Value,
        permissions: PermissionCallback,
    ) -> BoxFuture<'a, anyhow::Result<StartedDriver>> {
        Box::pin(async move {
            let (messages_tx, messages_rx) = mpsc::channel(256);
            let (queries_tx, queries_rx) = mpsc::unbounded_channel();
            let interrupts = Arc::new(AtomicUsize::new(0));
            let closed = Arc::new(AtomicBool::new(false));

            let scripted = ScriptedSession {
                directory: directory.to_owned(),
                options: options.clone(),
                messages_tx,
                permissions,
                queries_rx,
                interrupts: Arc::clone(&interrupts),
                closed: Arc::clone(&closed),
            };
            self.sessions_tx
                .send(scripted)
                .map_err(|_| anyhow::anyhow!("test dropped the scripted remote"))?;

            Ok(StartedDriver {
                handle: Box::new(ScriptedHandle { queries_tx, interrupts, closed }),
                messages: messages_rx,
            })
        })
    }
}

/// Test-side controls for one started driver run.
pub struct ScriptedSession {
    pub directory: PathBuf,
    pub options: serde_json::Value,
    messages_tx: mpsc::Sender<serde_json::Value>,
    permissions: PermissionCallback,
    queries_rx: mpsc::UnboundedReceiver<String>,
    pub interrupts: Arc<AtomicUsize>,
    pub closed: Arc<AtomicBool>,
}

impl ScriptedSession {
    /// Emit one driver message into the session's stream.
    pub async fn emit(&self, value: serde_json::Value) -> anyhow::Result<()> {
        self.messages_tx
            .send(value)
            .await
            .map_err(|_| anyhow::anyhow!("session pump is gone"))
    }

    pub async fn emit_init(&self, session_id: &str) -> anyhow::Result<()> {
        self.emit(serde_json::json!({
            "type": "system",
            "subtype": "init",
            "session_id": session_id,
        }))
        .await
    }

    pub async fn emit_result(&self, total_cost_usd: f64) -> anyhow::Result<()> {
        self.emit(serde_json::json!({
            "type": "result",
            "total_cost_usd": total_cost_usd,
            "usage": {},
        }))
        .await
    }

    /// Invoke the session's permission callback the way a driver would.
    /// Registration and broadcast happen before this returns.
    pub fn request_permission(&self, tool: &str, input: serde_json::Value) -> PermissionFuture {
        (self.permissions)(tool, input)
    }

    /// Next user turn delivered through `query`.
    pub async fn next_query(&mut self) -> anyhow::Result<String> {
        tokio::time::timeout(TIMEOUT, self.queries_rx.recv())
            .await
            .map_err(|_| anyhow::anyhow!("timed out waiting for a query"))?
            .ok_or_else(|| anyhow::anyhow!("driver handle dropped"))
    }

    pub fn interrupt_count(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }

    /// Drop the message stream to simulate a fatal driver crash.
    pub fn kill(self) {
        let Self { messages_tx, .. } = self;
        drop(messages_tx);
    }
}

struct ScriptedHandle {
    queries_tx: mpsc::UnboundedSender<String>,
    interrupts: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl DriverHandle for ScriptedHandle {
    fn query(&self, text: String) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.queries_tx
                .send(text)
                .map_err(|_| anyhow::anyhow!("scripted session dropped"))
        })
    }

    fn interrupt(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.interrupts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// Builder for a [`Store`] wired to a scripted driver, with small defaults.
pub struct StoreBuilder {
    ring_capacity: usize,
    queue_limit: usize,
    machine_name: String,
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreBuilder {
    pub fn new() -> Self {
        Self {
            ring_capacity: 1000,
            queue_limit: 64,
            machine_name: "testhost".to_owned(),
        }
    }

    pub fn ring_capacity(mut self, n: usize) -> Self {
        self.ring_capacity = n;
        self
    }

    pub fn queue_limit(mut self, n: usize) -> Self {
        self.queue_limit = n;
        self
    }

    pub fn machine_name(mut self, name: impl Into<String>) -> Self {
        self.machine_name = name.into();
        self
    }

    pub fn build(self) -> (Arc<Store>, ScriptedRemote) {
        let (driver, remote) = ScriptedDriver::new();
        let broker = Arc::new(PermissionBroker::new());
        let hub = Arc::new(Hub::new(self.queue_limit));
        let registry =
            Registry::new(driver, Arc::clone(&broker), Arc::clone(&hub), self.ring_capacity);
        let store = Arc::new(Store {
            registry,
            hub,
            broker,
            settings: DaemonSettings {
                machine_name: self.machine_name,
                server_version: env!("CARGO_PKG_VERSION").to_owned(),
                port: 0,
            },
            shutdown: CancellationToken::new(),
            started_at: Instant::now(),
        });
        (store, remote)
    }
}

/// Serve the WebSocket router on an ephemeral port.
pub async fn spawn_server(store: Arc<Store>) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let router = build_router(store);
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok((addr, handle))
}
