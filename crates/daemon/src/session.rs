// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One live agent instance bound to a working directory: driver ownership,
//! the session state machine, event intake into the ring, and the permission
//! gate between the driver callback and remote approvers.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::broker::PermissionBroker;
use crate::driver::{
    Driver, DriverHandle, PermissionCallback, PermissionDecision, PermissionFuture,
};
use crate::error::{ErrorCode, SessionError};
use crate::hub::Hub;
use crate::protocol::{error_frame, event_frame, ControlAction, Decision, ServerFrame, SessionInfo};
use crate::ring::EventRing;

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Working,
    AwaitingApproval,
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Working => "working",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Error => "error",
        }
    }
}

/// A live session. Construct with [`Session::open`].
pub struct Session {
    pub name: String,
    pub directory: PathBuf,
    pub ring: RwLock<EventRing>,
    state: RwLock<SessionState>,
    driver_session_id: RwLock<Option<String>>,
    cost_usd: RwLock<f64>,
    last_activity: RwLock<DateTime<Utc>>,
    handle: OnceLock<Box<dyn DriverHandle>>,
    /// Serializes driver calls: at most one in flight per session.
    driver_gate: tokio::sync::Mutex<()>,
    broker: Arc<PermissionBroker>,
    hub: Arc<Hub>,
    cancel: CancellationToken,
}

impl Session {
    /// Start a driver in `directory` and spawn the event pump.
    pub async fn open(
        name: String,
        directory: PathBuf,
        options: serde_json::Value,
        driver: &dyn Driver,
        broker: Arc<PermissionBroker>,
        hub: Arc<Hub>,
        ring_capacity: usize,
    ) -> anyhow::Result<Arc<Self>> {
        let session = Arc::new(Self {
            name,
            directory: directory.clone(),
            ring: RwLock::new(EventRing::new(ring_capacity)),
            state: RwLock::new(SessionState::Idle),
            driver_session_id: RwLock::new(None),
            cost_usd: RwLock::new(0.0),
            last_activity: RwLock::new(Utc::now()),
            handle: OnceLock::new(),
            driver_gate: tokio::sync::Mutex::new(()),
            broker,
            hub,
            cancel: CancellationToken::new(),
        });

        let callback = session.permission_callback();
        let started = driver.start(&directory, &options, callback).await?;
        let _ = session.handle.set(started.handle);
        tokio::spawn(Arc::clone(&session).pump(started.messages));
        Ok(session)
    }

    /// Build the permission callback handed to the driver.
    ///
    /// The synchronous prefix registers the pending permission, moves the
    /// session to `awaiting_approval`, and broadcasts the request, so the
    /// request frame is published before any later driver output can be
    /// sequenced. The returned future only waits for the decision.
    fn permission_callback(self: &Arc<Self>) -> PermissionCallback {
        let session = Arc::clone(self);
        Arc::new(move |tool_name: &str, tool_input: serde_json::Value| -> PermissionFuture {
            let (info, waiter) =
                session.broker.open(&session.name, tool_name, tool_input.clone());
            {
                let mut state = session.state.write();
                if *state != SessionState::Error {
                    *state = SessionState::AwaitingApproval;
                }
            }
            session.touch();
            session.hub.publish(
                &session.name,
                &ServerFrame::PermissionRequest {
                    request_id: info.request_id.clone(),
                    tool_name: info.tool_name.clone(),
                    tool_input: info.tool_input.clone(),
                    session_name: info.session_name.clone(),
                },
            );

            let session = Arc::clone(&session);
            Box::pin(async move {
                // A dropped sender (session teardown) counts as a deny.
                let decision = waiter.await.unwrap_or(Decision::Deny);
                if session.broker.pending_count(&session.name) == 0 {
                    let mut state = session.state.write();
                    if *state == SessionState::AwaitingApproval {
                        *state = SessionState::Working;
                    }
                }
                session.touch();
                match decision {
                    Decision::Allow => PermissionDecision::Allow { updated_input: tool_input },
                    Decision::Deny => PermissionDecision::Deny {
                        message: "User denied".to_owned(),
                        interrupt: false,
                    },
                }
            })
        })
    }

    /// Deliver a user turn to the driver. Moves `idle → working`.
    pub async fn submit_input(&self, text: &str) -> Result<(), SessionError> {
        {
            let mut state = self.state.write();
            if *state == SessionState::Error {
                return Err(SessionError::new(
                    ErrorCode::DriverError,
                    format!("session {} is in error state", self.name),
                ));
            }
            *state = SessionState::Working;
        }
        self.touch();

        let _gate = self.driver_gate.lock().await;
        let handle = self.driver()?;
        handle
            .query(text.to_owned())
            .await
            .map_err(|e| SessionError::new(ErrorCode::DriverError, e.to_string()))
    }

    /// Apply a control action.
    ///
    /// `interrupt` is safe from any state: a no-op in `idle` (the driver has
    /// nothing to cancel) and in `error` (the driver is already gone). The
    /// other actions are synthetic inputs through the same channel as user
    /// text; `clear` tells the driver to discard its conversation but the
    /// event ring keeps its history for replay.
    pub async fn control(&self, action: ControlAction) -> Result<(), SessionError> {
        match action {
            ControlAction::Interrupt => {
                if self.state() == SessionState::Error {
                    return Ok(());
                }
                let _gate = self.driver_gate.lock().await;
                let handle = self.driver()?;
                handle
                    .interrupt()
                    .await
                    .map_err(|e| SessionError::new(ErrorCode::DriverError, e.to_string()))
            }
            ControlAction::Compact => self.submit_input("/compact").await,
            ControlAction::Clear => self.submit_input("/clear").await,
            ControlAction::Plan => self.submit_input("/plan").await,
        }
    }

    /// Consume driver messages until teardown or stream end.
    async fn pump(self: Arc<Self>, mut rx: mpsc::Receiver<serde_json::Value>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(value) => self.ingest(value),
                    None => {
                        if !self.cancel.is_cancelled() {
                            self.fail("driver message stream ended unexpectedly");
                        }
                        break;
                    }
                }
            }
        }
        debug!(session = %self.name, "event pump stopped");
    }

    /// Wrap one driver message in an event, sequence it, and fan it out.
    fn ingest(&self, value: serde_json::Value) {
        let msg_type = value.get("type").and_then(|v| v.as_str()).unwrap_or_default();

        if msg_type == "system"
            && value.get("subtype").and_then(|v| v.as_str()) == Some("init")
        {
            if let Some(id) = value.get("session_id").and_then(|v| v.as_str()) {
                *self.driver_session_id.write() = Some(id.to_owned());
            }
        }

        if msg_type == "result" {
            if let Some(cost) = value.get("total_cost_usd").and_then(|v| v.as_f64()) {
                if cost > 0.0 {
                    *self.cost_usd.write() += cost;
                }
            }
            let mut state = self.state.write();
            if matches!(*state, SessionState::Working | SessionState::AwaitingApproval) {
                *state = SessionState::Idle;
            }
        }

        let event = self.ring.write().append(value);
        self.touch();
        self.hub.publish(&self.name, &event_frame(&self.name, &event));
    }

    /// Unrecoverable driver failure: transition to `error`, deny pending
    /// permissions, and surface the failure on the event stream and as an
    /// error frame to subscribers. The session stays listed until closed.
    pub fn fail(&self, detail: &str) {
        error!(
            session = %self.name,
            code = %ErrorCode::DriverError,
            "driver failure: {detail}"
        );
        *self.state.write() = SessionState::Error;
        let denied = self.broker.fail_all(&self.name);
        if denied > 0 {
            debug!(session = %self.name, denied, "denied pending permissions on failure");
        }

        let event = self
            .ring
            .write()
            .append(json!({"type": "error", "message": detail}));
        self.touch();
        self.hub.publish(&self.name, &event_frame(&self.name, &event));
        self.hub
            .publish(&self.name, &error_frame(ErrorCode::DriverError, detail, Some(&self.name)));
    }

    /// Tear the session down: stop the pump, deny pending permissions, and
    /// release the driver.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let denied = self.broker.fail_all(&self.name);
        if denied > 0 {
            debug!(session = %self.name, denied, "denied pending permissions on teardown");
        }
        if let Some(handle) = self.handle.get() {
            if let Err(e) = handle.close().await {
                debug!(session = %self.name, "driver close failed: {e}");
            }
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn cost_usd(&self) -> f64 {
        *self.cost_usd.read()
    }

    pub fn driver_session_id(&self) -> Option<String> {
        self.driver_session_id.read().clone()
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        *self.last_activity.read()
    }

    /// Snapshot for `welcome` and the control plane.
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            name: self.name.clone(),
            directory: self.directory.to_string_lossy().into_owned(),
            state: self.state(),
            driver_session_id: self.driver_session_id(),
            cost_usd: self.cost_usd(),
            last_activity: self.last_activity(),
        }
    }

    fn touch(&self) {
        *self.last_activity.write() = Utc::now();
    }

    fn driver(&self) -> Result<&dyn DriverHandle, SessionError> {
        self.handle
            .get()
            .map(|h| h.as_ref())
            .ok_or_else(|| SessionError::new(ErrorCode::DriverError, "driver not started"))
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
