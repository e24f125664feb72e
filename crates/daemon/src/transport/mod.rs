// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod state;
pub mod ws;

pub use state::{DaemonSettings, Store};

use std::sync::Arc;

use axum::routing::get;
use axum::Router;

/// Build the WebSocket router for the client transport.
pub fn build_router(store: Arc<Store>) -> Router {
    Router::new().route("/ws", get(ws::ws_handler)).with_state(store)
}
