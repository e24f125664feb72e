// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Opaque agent-engine interface consumed by sessions.
//!
//! A driver begins an agent run in a working directory and emits messages
//! through an async stream. The first message is expected to carry
//! `type=system, subtype=init, session_id=<id>`; a terminal `type=result`
//! message with `total_cost_usd` signals completion of a turn. Tool uses that
//! require approval are routed through the session-provided permission
//! callback.

pub mod process;

pub use process::ProcessDriver;

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Decision returned from the permission callback to the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "behavior", rename_all = "lowercase")]
pub enum PermissionDecision {
    Allow {
        updated_input: serde_json::Value,
    },
    Deny {
        message: String,
        interrupt: bool,
    },
}

/// Future half of a permission gate, resolving once a human decides.
pub type PermissionFuture = BoxFuture<'static, PermissionDecision>;

/// Invoked by a driver when a tool use requires approval.
///
/// The callback publishes the pending permission synchronously before it
/// returns; only the wait for the decision lives in the returned future.
/// Drivers may therefore keep pumping their message stream while the gate is
/// open without reordering the request behind later events.
pub type PermissionCallback =
    Arc<dyn Fn(&str, serde_json::Value) -> PermissionFuture + Send + Sync>;

/// A started agent run: the control handle plus its message stream.
pub struct StartedDriver {
    pub handle: Box<dyn DriverHandle>,
    pub messages: mpsc::Receiver<serde_json::Value>,
}

/// Factory for agent runs, one per session.
pub trait Driver: Send + Sync + 'static {
    fn start<'a>(
        &'a self,
        directory: &'a Path,
        options: &'a serde_json::Value,
        permissions: PermissionCallback,
    ) -> BoxFuture<'a, anyhow::Result<StartedDriver>>;
}

/// Control surface of a running agent.
///
/// Object-safe for use as `Box<dyn DriverHandle>`. The message stream closing
/// is the driver's end-of-life signal; `close` releases all resources.
pub trait DriverHandle: Send + Sync + 'static {
    /// Submit a user turn.
    fn query(&self, text: String) -> BoxFuture<'_, anyhow::Result<()>>;

    /// Cancel the current turn.
    fn interrupt(&self) -> BoxFuture<'_, anyhow::Result<()>>;

    /// Release all resources.
    fn close(&self) -> BoxFuture<'_, anyhow::Result<()>>;
}
