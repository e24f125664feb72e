// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire protocol frames for the client ↔ daemon WebSocket channel.
//!
//! Frames are internally-tagged JSON objects (`{"type": "hello", ...}`) with
//! `snake_case` field names. Unknown message types fail to decode (protocol
//! error); unknown fields inside a known type are ignored for forward
//! compatibility.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::broker::PendingPermission;
use crate::error::ErrorCode;
use crate::event::Event;
use crate::session::SessionState;

/// Frames sent by a connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Hello {
        client_version: String,
        device_name: String,
    },
    Subscribe {
        sessions: SessionSelector,
    },
    Input {
        session: String,
        text: String,
    },
    PermissionResponse {
        request_id: String,
        decision: Decision,
    },
    Control {
        session: String,
        action: ControlAction,
    },
    Sync {
        session: String,
        last_seen_sequence: u64,
    },
}

/// Frames sent by the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Welcome {
        server_version: String,
        machine_name: String,
        sessions: Vec<SessionInfo>,
    },
    Event {
        session: String,
        sequence: u64,
        #[serde(with = "timestamp")]
        timestamp: DateTime<Utc>,
        message: serde_json::Value,
    },
    PermissionRequest {
        request_id: String,
        tool_name: String,
        tool_input: serde_json::Value,
        session_name: String,
    },
    SyncResponse {
        session: String,
        events: Vec<Event>,
        truncated: bool,
        /// Unresolved permission requests for the session, replayed so a
        /// reconnecting client can re-render its approval UI.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pending: Vec<PendingPermission>,
    },
    Error {
        code: ErrorCode,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session: Option<String>,
    },
}

/// Subscription target: every session on the machine, or a named set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SelectorRepr", into = "SelectorRepr")]
pub enum SessionSelector {
    All,
    Named(Vec<String>),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum SelectorRepr {
    Wildcard(String),
    Names(Vec<String>),
}

impl TryFrom<SelectorRepr> for SessionSelector {
    type Error = String;

    fn try_from(repr: SelectorRepr) -> Result<Self, String> {
        match repr {
            SelectorRepr::Wildcard(s) if s == "*" => Ok(Self::All),
            SelectorRepr::Wildcard(s) => {
                Err(format!("expected \"*\" or a list of session names, got {s:?}"))
            }
            SelectorRepr::Names(names) => Ok(Self::Named(names)),
        }
    }
}

impl From<SessionSelector> for SelectorRepr {
    fn from(sel: SessionSelector) -> Self {
        match sel {
            SessionSelector::All => Self::Wildcard("*".to_owned()),
            SessionSelector::Named(names) => Self::Names(names),
        }
    }
}

/// A human decision on a pending permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Deny,
}

/// Session control verbs beyond plain text input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Interrupt,
    Compact,
    Clear,
    Plan,
}

/// Per-session snapshot carried in `welcome` and control-plane `list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub name: String,
    pub directory: String,
    pub state: SessionState,
    #[serde(rename = "claude_session_id")]
    pub driver_session_id: Option<String>,
    pub cost_usd: f64,
    #[serde(with = "timestamp")]
    pub last_activity: DateTime<Utc>,
}

/// Build a `ServerFrame::Error`.
pub fn error_frame(code: ErrorCode, message: &str, session: Option<&str>) -> ServerFrame {
    ServerFrame::Error {
        code,
        message: message.to_owned(),
        session: session.map(ToOwned::to_owned),
    }
}

/// Build a `ServerFrame::Event` from a session name and a ring event.
pub fn event_frame(session: &str, event: &Event) -> ServerFrame {
    ServerFrame::Event {
        session: session.to_owned(),
        sequence: event.sequence,
        timestamp: event.timestamp,
        message: event.payload.clone(),
    }
}

/// ISO-8601 timestamps with fractional seconds.
///
/// Serialization always emits an explicit UTC offset and microsecond
/// precision. The decoder additionally accepts timestamps without a timezone
/// suffix (interpreted as UTC) and without a fractional component.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(de)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    /// Parse an ISO-8601 timestamp, tolerating absent timezone and fraction.
    pub fn parse(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        match DateTime::parse_from_rfc3339(raw) {
            Ok(dt) => Ok(dt.with_timezone(&Utc)),
            // `%.f` matches an optional fractional component.
            Err(_) => NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|naive| naive.and_utc()),
        }
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
