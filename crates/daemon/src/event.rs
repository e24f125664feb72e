// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Envelope around one driver message, as stored in the ring and replayed
/// inside `sync_response` frames.
///
/// `sequence` is scoped to the owning session, starts at 1, and is dense for
/// the session's lifetime. `payload` is passed through unchanged from the
/// driver and serializes under the wire name `message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub sequence: u64,
    #[serde(with = "crate::protocol::timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "message")]
    pub payload: serde_json::Value,
}
