// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Best-effort DNS-SD advertiser.
//!
//! Publishes `_wormhole._tcp` in the `local.` domain with the machine's
//! hostname as the instance name and the daemon's listen port. Advertising
//! failure is logged and never prevents the daemon from serving.

use std::collections::HashMap;

use mdns_sd::{ServiceDaemon, ServiceInfo};
use tracing::{debug, info, warn};

pub const SERVICE_TYPE: &str = "_wormhole._tcp.local.";

/// Handle to a registered advertisement. Dropping without [`shutdown`]
/// leaves unregistration to the OS; shutdown flushes it explicitly.
///
/// [`shutdown`]: Advertiser::shutdown
pub struct Advertiser {
    daemon: Option<ServiceDaemon>,
    fullname: Option<String>,
}

impl Advertiser {
    /// No-op advertiser for `discovery.enabled = false`.
    pub fn disabled() -> Self {
        Self { daemon: None, fullname: None }
    }

    /// Register the service. Best-effort: failure logs a warning and returns
    /// a disabled handle.
    pub fn advertise(instance: &str, port: u16) -> Self {
        match try_advertise(instance, port) {
            Ok(advertiser) => {
                info!(instance, port, "advertising {SERVICE_TYPE}");
                advertiser
            }
            Err(e) => {
                warn!("discovery advertising unavailable: {e:#}");
                Self::disabled()
            }
        }
    }

    /// Unregister and stop the responder.
    pub fn shutdown(self) {
        let (Some(daemon), Some(fullname)) = (self.daemon, self.fullname) else {
            return;
        };
        if let Err(e) = daemon.unregister(&fullname) {
            debug!("discovery unregister failed: {e}");
        }
        let _ = daemon.shutdown();
    }
}

fn try_advertise(instance: &str, port: u16) -> anyhow::Result<Advertiser> {
    let daemon = ServiceDaemon::new()?;
    let host = format!("{instance}.local.");
    let info = ServiceInfo::new(
        SERVICE_TYPE,
        instance,
        &host,
        "",
        port,
        HashMap::<String, String>::new(),
    )?
    .enable_addr_auto();
    let fullname = info.get_fullname().to_owned();
    daemon.register(info)?;
    Ok(Advertiser { daemon: Some(daemon), fullname: Some(fullname) })
}
