// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session table keyed independently by name and by working directory.
//!
//! Both mappings mutate under a single lock, so they can never disagree.
//! In-flight opens reserve their keys before the driver starts; a conflicting
//! `open` fails with `SESSION_EXISTS` without touching a driver.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::broker::PermissionBroker;
use crate::driver::Driver;
use crate::error::{ErrorCode, SessionError};
use crate::hub::Hub;
use crate::session::Session;

#[derive(Default)]
struct RegistryInner {
    by_name: HashMap<String, Arc<Session>>,
    by_directory: HashMap<PathBuf, Arc<Session>>,
    reserved_names: HashSet<String>,
    /// directory → reserving session name, for conflict messages.
    reserved_dirs: HashMap<PathBuf, String>,
}

impl RegistryInner {
    fn name_taken(&self, name: &str) -> bool {
        self.by_name.contains_key(name) || self.reserved_names.contains(name)
    }

    fn directory_owner(&self, directory: &Path) -> Option<String> {
        self.by_directory
            .get(directory)
            .map(|s| s.name.clone())
            .or_else(|| self.reserved_dirs.get(directory).cloned())
    }
}

/// Global map of sessions, one per name and per directory.
pub struct Registry {
    inner: Mutex<RegistryInner>,
    driver: Arc<dyn Driver>,
    broker: Arc<PermissionBroker>,
    hub: Arc<Hub>,
    ring_capacity: usize,
}

impl Registry {
    pub fn new(
        driver: Arc<dyn Driver>,
        broker: Arc<PermissionBroker>,
        hub: Arc<Hub>,
        ring_capacity: usize,
    ) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            driver,
            broker,
            hub,
            ring_capacity,
        }
    }

    /// Open a session in `directory`, auto-naming it when `name` is absent.
    pub async fn open(
        &self,
        name: Option<String>,
        directory: PathBuf,
        options: serde_json::Value,
    ) -> Result<Arc<Session>, SessionError> {
        if !directory.is_absolute() {
            return Err(SessionError::new(
                ErrorCode::InvalidMessage,
                format!("directory must be an absolute path: {}", directory.display()),
            ));
        }

        // Reserve both keys before any driver work.
        let name = {
            let mut inner = self.inner.lock();
            if let Some(owner) = inner.directory_owner(&directory) {
                return Err(SessionError::new(
                    ErrorCode::SessionExists,
                    format!("A session already exists in this directory: {owner}"),
                ));
            }
            let name = match name {
                Some(name) => {
                    if inner.name_taken(&name) {
                        return Err(SessionError::new(
                            ErrorCode::SessionExists,
                            format!("A session already exists with this name: {name}"),
                        ));
                    }
                    name
                }
                None => auto_name(&inner, &directory),
            };
            inner.reserved_names.insert(name.clone());
            inner.reserved_dirs.insert(directory.clone(), name.clone());
            name
        };

        let result = Session::open(
            name.clone(),
            directory.clone(),
            options,
            self.driver.as_ref(),
            Arc::clone(&self.broker),
            Arc::clone(&self.hub),
            self.ring_capacity,
        )
        .await;

        let mut inner = self.inner.lock();
        inner.reserved_names.remove(&name);
        inner.reserved_dirs.remove(&directory);
        match result {
            Ok(session) => {
                inner.by_name.insert(name.clone(), Arc::clone(&session));
                inner.by_directory.insert(directory.clone(), Arc::clone(&session));
                drop(inner);
                info!(session = %name, directory = %directory.display(), "session opened");
                Ok(session)
            }
            Err(e) => Err(SessionError::new(ErrorCode::DriverError, format!("{e:#}"))),
        }
    }

    /// Tear down a session and drop it from both indexes.
    pub async fn close(&self, name: &str) -> Result<(), SessionError> {
        let session = {
            let mut inner = self.inner.lock();
            let session = inner.by_name.remove(name).ok_or_else(|| {
                SessionError::new(
                    ErrorCode::SessionNotFound,
                    format!("no session named {name}"),
                )
            })?;
            inner.by_directory.remove(&session.directory);
            session
        };
        session.shutdown().await;
        info!(session = %name, "session closed");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Session>> {
        self.inner.lock().by_name.get(name).cloned()
    }

    /// Snapshot of all sessions, sorted by name.
    pub fn list(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<Arc<Session>> =
            self.inner.lock().by_name.values().cloned().collect();
        sessions.sort_by(|a, b| a.name.cmp(&b.name));
        sessions
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().by_name.is_empty()
    }

    /// Close every session; used on daemon shutdown.
    pub async fn close_all(&self) {
        let sessions: Vec<Arc<Session>> = {
            let mut inner = self.inner.lock();
            inner.by_directory.clear();
            inner.by_name.drain().map(|(_, s)| s).collect()
        };
        for session in sessions {
            session.shutdown().await;
        }
    }
}

/// Generate `<basename(dir)>-<4 hex chars>`, avoiding taken names.
fn auto_name(inner: &RegistryInner, directory: &Path) -> String {
    let base = directory
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "session".to_owned());
    loop {
        let candidate = format!("{base}-{:04x}", rand::random::<u16>());
        if !inner.name_taken(&candidate) {
            return candidate;
        }
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
