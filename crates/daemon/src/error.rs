// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable error codes shared by the WebSocket protocol and the control socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    SessionExists,
    SessionNotFound,
    DriverError,
    /// Reserved for a future revision; never emitted.
    PermissionTimeout,
    WebsocketError,
    InvalidMessage,
    NotSubscribed,
    Backpressure,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionExists => "SESSION_EXISTS",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::DriverError => "DRIVER_ERROR",
            Self::PermissionTimeout => "PERMISSION_TIMEOUT",
            Self::WebsocketError => "WEBSOCKET_ERROR",
            Self::InvalidMessage => "INVALID_MESSAGE",
            Self::NotSubscribed => "NOT_SUBSCRIBED",
            Self::Backpressure => "BACKPRESSURE",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A coded failure surfaced to clients, on either transport.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionError {
    pub code: ErrorCode,
    pub message: String,
}

impl SessionError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for SessionError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
