// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::broker::PermissionBroker;
use crate::hub::Hub;
use crate::registry::Registry;

/// Shared daemon state passed to all handlers via the axum `State` extractor
/// and to the control socket.
pub struct Store {
    pub registry: Registry,
    pub hub: Arc<Hub>,
    pub broker: Arc<PermissionBroker>,
    pub settings: DaemonSettings,
    pub shutdown: CancellationToken,
    pub started_at: Instant,
}

/// Static daemon identity (immutable after startup).
pub struct DaemonSettings {
    pub machine_name: String,
    pub server_version: String,
    pub port: u16,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("machine_name", &self.settings.machine_name)
            .field("sessions", &self.registry.len())
            .field("clients", &self.hub.client_count())
            .finish()
    }
}
