// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;

pub const DEFAULT_PORT: u16 = 7117;

/// Remote-control daemon for AI coding agents.
#[derive(Debug, Parser)]
#[command(name = "wormholed", version, about)]
pub struct Config {
    /// WebSocket port to listen on.
    #[arg(long, env = "WORMHOLE_PORT")]
    pub port: Option<u16>,

    /// Host address to bind to.
    #[arg(long, env = "WORMHOLE_HOST")]
    pub host: Option<String>,

    /// Enable or disable DNS-SD discovery advertising.
    #[arg(long, env = "WORMHOLE_DISCOVERY_ENABLED")]
    pub discovery_enabled: Option<bool>,

    /// Control socket path for the local CLI.
    #[arg(long, env = "WORMHOLE_CONTROL_SOCKET")]
    pub control_socket: Option<PathBuf>,

    /// Config file path (default: <user config dir>/wormhole/config.toml).
    #[arg(long, env = "WORMHOLE_CONFIG")]
    pub config_file: Option<PathBuf>,

    /// Driver command used to launch agent processes.
    #[arg(long, env = "WORMHOLE_DRIVER_COMMAND")]
    pub driver_command: Option<String>,

    /// Machine name advertised to clients (default: hostname).
    #[arg(long, env = "WORMHOLE_MACHINE_NAME")]
    pub machine_name: Option<String>,

    /// Event ring capacity per session.
    #[arg(long, env = "WORMHOLE_RING_CAPACITY", default_value_t = 1000)]
    pub ring_capacity: usize,

    /// Per-client outbound queue high-water mark.
    #[arg(long, env = "WORMHOLE_CLIENT_QUEUE_LIMIT", default_value_t = 4096)]
    pub client_queue_limit: usize,

    /// Log format (json or text).
    #[arg(long, env = "WORMHOLE_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "WORMHOLE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// TOML config file shape. Every key is optional; flags and environment
/// variables override it.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub daemon: DaemonSection,
    #[serde(default)]
    pub discovery: DiscoverySection,
    #[serde(default)]
    pub driver: DriverSection,
}

#[derive(Debug, Default, Deserialize)]
pub struct DaemonSection {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub control_socket: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DiscoverySection {
    pub enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DriverSection {
    pub command: Option<String>,
}

/// Fully-resolved runtime settings: flag/env > file > default.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub host: String,
    pub discovery_enabled: bool,
    pub control_socket: PathBuf,
    pub driver_command: Vec<String>,
    pub machine_name: String,
    pub ring_capacity: usize,
    pub client_queue_limit: usize,
    pub log_format: String,
    pub log_level: String,
}

impl Config {
    /// Load the TOML config file if one exists.
    pub fn load_file(&self) -> anyhow::Result<FileConfig> {
        let path = match &self.config_file {
            Some(path) => Some(path.clone()),
            None => default_config_path(),
        };
        match path {
            Some(path) if path.exists() => {
                let contents = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                toml::from_str(&contents)
                    .with_context(|| format!("failed to parse {}", path.display()))
            }
            _ => Ok(FileConfig::default()),
        }
    }

    /// Resolve flags, environment, and the config file into [`Settings`].
    pub fn resolve(&self) -> anyhow::Result<Settings> {
        let file = self.load_file()?;

        let driver_command: Vec<String> = self
            .driver_command
            .clone()
            .or(file.driver.command)
            .unwrap_or_else(|| "claude".to_owned())
            .split_whitespace()
            .map(ToOwned::to_owned)
            .collect();
        if driver_command.is_empty() {
            anyhow::bail!("driver command must not be empty");
        }

        Ok(Settings {
            port: self.port.or(file.daemon.port).unwrap_or(DEFAULT_PORT),
            host: self
                .host
                .clone()
                .or(file.daemon.host)
                .unwrap_or_else(|| "0.0.0.0".to_owned()),
            discovery_enabled: self.discovery_enabled.or(file.discovery.enabled).unwrap_or(true),
            control_socket: self
                .control_socket
                .clone()
                .or(file.daemon.control_socket)
                .unwrap_or_else(default_control_socket),
            driver_command,
            machine_name: self.machine_name.clone().unwrap_or_else(local_hostname),
            ring_capacity: self.ring_capacity,
            client_queue_limit: self.client_queue_limit,
            log_format: self.log_format.clone(),
            log_level: self.log_level.clone(),
        })
    }
}

/// Well-known control socket location.
pub fn default_control_socket() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("wormhole.sock")
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("wormhole").join("config.toml"))
}

fn local_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "wormhole".to_owned())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
