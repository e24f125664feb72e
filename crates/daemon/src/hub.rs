// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client subscription tracking and event fan-out.
//!
//! Every frame destined for a client flows through that client's single
//! bounded outbound queue, which yields per-client ordering for free. A slow
//! client fills its own queue and gets dropped; it can never stall a session
//! or another client.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::protocol::{ServerFrame, SessionSelector};

/// What a client has asked to observe.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Subscription {
    /// Fresh connections observe nothing until they subscribe.
    #[default]
    None,
    All,
    Named(HashSet<String>),
}

impl From<SessionSelector> for Subscription {
    fn from(sel: SessionSelector) -> Self {
        match sel {
            SessionSelector::All => Self::All,
            SessionSelector::Named(names) => Self::Named(names.into_iter().collect()),
        }
    }
}

/// One connected client as seen by the hub.
pub struct ClientHandle {
    pub id: u64,
    pub device_name: String,
    pub client_version: String,
    tx: mpsc::Sender<ServerFrame>,
    subscription: RwLock<Subscription>,
    /// Cancelled on queue overflow; the endpoint sends a final
    /// `BACKPRESSURE` error and closes the connection.
    pub cancel: CancellationToken,
}

impl ClientHandle {
    /// Whether this client is subscribed to the named session.
    pub fn wants(&self, session: &str) -> bool {
        match &*self.subscription.read() {
            Subscription::None => false,
            Subscription::All => true,
            Subscription::Named(names) => names.contains(session),
        }
    }

    pub fn subscribe(&self, sel: SessionSelector) {
        *self.subscription.write() = sel.into();
    }

    /// Enqueue a frame for this client.
    ///
    /// Returns false if the frame was not queued. Overflow beyond the
    /// high-water mark cancels the client.
    pub fn push(&self, frame: ServerFrame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    client = self.id,
                    device = %self.device_name,
                    code = %crate::error::ErrorCode::Backpressure,
                    "outbound queue overflow, dropping client"
                );
                self.cancel.cancel();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Tracks connected clients and fans session frames out to subscribers.
pub struct Hub {
    clients: RwLock<HashMap<u64, Arc<ClientHandle>>>,
    next_id: AtomicU64,
    queue_limit: usize,
}

impl Hub {
    pub fn new(queue_limit: usize) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_limit: queue_limit.max(1),
        }
    }

    /// Add a client after its handshake; returns the handle and the receiver
    /// end of its outbound queue.
    pub fn register(
        &self,
        device_name: &str,
        client_version: &str,
    ) -> (Arc<ClientHandle>, mpsc::Receiver<ServerFrame>) {
        let (tx, rx) = mpsc::channel(self.queue_limit);
        let handle = Arc::new(ClientHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            device_name: device_name.to_owned(),
            client_version: client_version.to_owned(),
            tx,
            subscription: RwLock::new(Subscription::None),
            cancel: CancellationToken::new(),
        });
        self.clients.write().insert(handle.id, Arc::clone(&handle));
        (handle, rx)
    }

    /// Remove a client; only its subscription state dies with it.
    pub fn unregister(&self, id: u64) {
        self.clients.write().remove(&id);
    }

    /// Fan a session-scoped frame out to every subscribed client.
    pub fn publish(&self, session: &str, frame: &ServerFrame) {
        let clients: Vec<Arc<ClientHandle>> =
            self.clients.read().values().cloned().collect();
        for client in clients {
            if client.wants(session) {
                client.push(frame.clone());
            }
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }
}

#[cfg(test)]
#[path = "hub_tests.rs"]
mod tests;
