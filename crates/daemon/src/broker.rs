// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Correlates outbound permission requests with inbound decisions.
//!
//! Each pending permission is a one-shot resumption slot: the driver callback
//! blocks on the receiver half while the request is broadcast to clients, and
//! whichever client answers first completes the slot. Duplicate or unknown
//! resolutions are reported to the caller, never silently dropped.

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::protocol::Decision;

/// A tool-use gate awaiting a human decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingPermission {
    pub request_id: String,
    pub tool_name: String,
    pub tool_input: serde_json::Value,
    pub session_name: String,
    #[serde(with = "crate::protocol::timestamp")]
    pub created_at: DateTime<Utc>,
}

/// Resolution targeted a request_id that is not pending (never existed, or
/// already resolved).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownRequest;

impl fmt::Display for UnknownRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("unknown request_id")
    }
}

impl std::error::Error for UnknownRequest {}

struct PendingEntry {
    info: PendingPermission,
    tx: oneshot::Sender<Decision>,
}

#[derive(Default)]
struct BrokerInner {
    pending: HashMap<String, PendingEntry>,
    by_session: HashMap<String, HashSet<String>>,
}

/// Process-wide registry of pending permissions, keyed by request_id with a
/// per-session index for teardown.
#[derive(Default)]
pub struct PermissionBroker {
    inner: Mutex<BrokerInner>,
}

impl PermissionBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a pending permission and return it with its waiter.
    ///
    /// The entry is registered before this returns, so a resolution racing in
    /// from another task is honored as soon as the request_id is visible.
    pub fn open(
        &self,
        session: &str,
        tool_name: &str,
        tool_input: serde_json::Value,
    ) -> (PendingPermission, oneshot::Receiver<Decision>) {
        let info = PendingPermission {
            request_id: uuid::Uuid::new_v4().to_string(),
            tool_name: tool_name.to_owned(),
            tool_input,
            session_name: session.to_owned(),
            created_at: Utc::now(),
        };
        let (tx, rx) = oneshot::channel();

        let mut inner = self.inner.lock();
        inner
            .by_session
            .entry(session.to_owned())
            .or_default()
            .insert(info.request_id.clone());
        inner
            .pending
            .insert(info.request_id.clone(), PendingEntry { info: info.clone(), tx });
        drop(inner);

        (info, rx)
    }

    /// Complete the matching waiter exactly once.
    ///
    /// The entry is removed from both indexes before the waiter is woken, so
    /// a second resolution for the same request_id observes `UnknownRequest`.
    pub fn resolve(&self, request_id: &str, decision: Decision) -> Result<(), UnknownRequest> {
        let entry = {
            let mut inner = self.inner.lock();
            let entry = inner.pending.remove(request_id).ok_or(UnknownRequest)?;
            if let Some(ids) = inner.by_session.get_mut(&entry.info.session_name) {
                ids.remove(request_id);
                if ids.is_empty() {
                    inner.by_session.remove(&entry.info.session_name);
                }
            }
            entry
        };
        // A dropped receiver means the callback was already torn down; the
        // decision has nowhere to land and that is not the resolver's fault.
        let _ = entry.tx.send(decision);
        Ok(())
    }

    /// Deny every pending request for a session. Returns how many were denied.
    pub fn fail_all(&self, session: &str) -> usize {
        let entries = {
            let mut inner = self.inner.lock();
            let Some(ids) = inner.by_session.remove(session) else {
                return 0;
            };
            ids.into_iter()
                .filter_map(|id| inner.pending.remove(&id))
                .collect::<Vec<_>>()
        };
        let n = entries.len();
        for entry in entries {
            let _ = entry.tx.send(Decision::Deny);
        }
        n
    }

    /// Snapshot of unresolved requests for a session, oldest first.
    pub fn pending_for(&self, session: &str) -> Vec<PendingPermission> {
        let inner = self.inner.lock();
        let Some(ids) = inner.by_session.get(session) else {
            return vec![];
        };
        let mut infos: Vec<PendingPermission> = ids
            .iter()
            .filter_map(|id| inner.pending.get(id).map(|e| e.info.clone()))
            .collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        infos
    }

    pub fn pending_count(&self, session: &str) -> usize {
        self.inner.lock().by_session.get(session).map_or(0, HashSet::len)
    }
}

#[cfg(test)]
#[path = "broker_tests.rs"]
mod tests;
