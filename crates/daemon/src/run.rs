// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level daemon runner, shared by `main` and tests.
//!
//! Startup acquires the process singletons in order (listener, control
//! socket, advertiser, signal handler); shutdown releases them in reverse
//! after closing all sessions, which denies any pending permissions.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::broker::PermissionBroker;
use crate::config::{Config, Settings};
use crate::control;
use crate::discovery::Advertiser;
use crate::driver::ProcessDriver;
use crate::hub::Hub;
use crate::registry::Registry;
use crate::transport::{build_router, DaemonSettings, Store};

/// A fully-started daemon. Returned by [`prepare`] so callers (tests) can
/// reach the [`Store`] and the bound address before [`PreparedDaemon::wait`].
pub struct PreparedDaemon {
    pub store: Arc<Store>,
    pub addr: std::net::SocketAddr,
    pub control_path: std::path::PathBuf,
    advertiser: Option<Advertiser>,
    server: JoinHandle<()>,
}

/// Run the daemon to completion.
pub async fn run(config: Config) -> anyhow::Result<()> {
    prepare(config).await?.wait().await
}

/// Initialize tracing/logging from resolved settings.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(settings: &Settings) {
    use tracing_subscriber::fmt;

    // Priority: --log-level / WORMHOLE_LOG_LEVEL > RUST_LOG > default.
    let filter = if std::env::var("WORMHOLE_LOG_LEVEL").is_err() && settings.log_level == "info" {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_level))
    } else {
        EnvFilter::try_new(&settings.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let result = match settings.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

/// Bind the listener, start the control socket and advertiser, and return a
/// running daemon. Failure to bind the listen port or to create the control
/// socket is fatal.
pub async fn prepare(config: Config) -> anyhow::Result<PreparedDaemon> {
    let settings = config.resolve()?;
    init_tracing(&settings);

    let shutdown = CancellationToken::new();
    let driver = Arc::new(ProcessDriver::new(settings.driver_command.clone())?);
    let broker = Arc::new(PermissionBroker::new());
    let hub = Arc::new(Hub::new(settings.client_queue_limit));
    let registry =
        Registry::new(driver, Arc::clone(&broker), Arc::clone(&hub), settings.ring_capacity);

    // Bind before building the store so the advertised port is the real one
    // even when the configured port is 0.
    let listen_addr = format!("{}:{}", settings.host, settings.port);
    let listener = TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("failed to bind listen port {listen_addr}"))?;
    let addr = listener.local_addr()?;

    let store = Arc::new(Store {
        registry,
        hub,
        broker,
        settings: DaemonSettings {
            machine_name: settings.machine_name.clone(),
            server_version: env!("CARGO_PKG_VERSION").to_owned(),
            port: addr.port(),
        },
        shutdown: shutdown.clone(),
        started_at: Instant::now(),
    });

    info!("listening on {addr}");
    let router = build_router(Arc::clone(&store));
    let sd = shutdown.clone();
    let server = tokio::spawn(async move {
        let result =
            axum::serve(listener, router).with_graceful_shutdown(sd.cancelled_owned()).await;
        if let Err(e) = result {
            error!("server error: {e}");
        }
    });

    let control_path = control::serve(Arc::clone(&store), settings.control_socket.clone())?;

    let advertiser = if settings.discovery_enabled {
        Advertiser::advertise(&settings.machine_name, addr.port())
    } else {
        Advertiser::disabled()
    };

    spawn_signal_handler(shutdown);

    Ok(PreparedDaemon { store, addr, control_path, advertiser: Some(advertiser), server })
}

impl PreparedDaemon {
    /// Block until shutdown, then tear down in reverse acquisition order.
    pub async fn wait(mut self) -> anyhow::Result<()> {
        self.store.shutdown.cancelled().await;

        // Sessions first: denies pending permissions and stops drivers.
        self.store.registry.close_all().await;
        if let Some(advertiser) = self.advertiser.take() {
            advertiser.shutdown();
        }
        // The control socket loop exits on the same token; the listener is
        // draining under graceful shutdown.
        let _ = self.server.await;
        info!("daemon stopped");
        Ok(())
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.store.shutdown.clone()
    }
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        // First signal: graceful shutdown.
        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGTERM");
            }
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGINT");
            }
        }
        shutdown.cancel();

        // Second signal: force exit.
        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGTERM again, forcing exit");
            }
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGINT again, forcing exit");
            }
        }
        std::process::exit(130);
    });
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
