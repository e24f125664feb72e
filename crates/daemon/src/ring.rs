// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;

use crate::event::Event;

/// Bounded per-session FIFO of driver events with dense sequence numbers.
///
/// Sequences start at 1 and are never reused or skipped. When the ring is
/// full the oldest event is evicted, raising `min_seq`; evicted events are
/// unrecoverable and catch-up requests below the floor are answered with a
/// truncation marker.
#[derive(Debug)]
pub struct EventRing {
    events: VecDeque<Arc<Event>>,
    capacity: usize,
    next_seq: u64,
}

impl EventRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            next_seq: 1,
        }
    }

    /// Wrap a driver payload in an [`Event`], assign the next sequence, and
    /// append it, evicting the oldest event when at capacity.
    pub fn append(&mut self, payload: serde_json::Value) -> Arc<Event> {
        let event = Arc::new(Event {
            sequence: self.next_seq,
            timestamp: Utc::now(),
            payload,
        });
        self.next_seq += 1;
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(Arc::clone(&event));
        event
    }

    /// Lowest sequence still held. Equals `max_seq() + 1` when empty.
    pub fn min_seq(&self) -> u64 {
        self.events.front().map(|e| e.sequence).unwrap_or(self.next_seq)
    }

    /// Highest sequence ever assigned (0 before the first append).
    pub fn max_seq(&self) -> u64 {
        self.next_seq - 1
    }

    /// Current `[min_seq, max_seq]` range.
    pub fn range(&self) -> (u64, u64) {
        (self.min_seq(), self.max_seq())
    }

    /// Events with sequences in `[min, max]`, clamped to what is retained.
    pub fn snapshot(&self, min: u64, max: u64) -> Vec<Arc<Event>> {
        self.events
            .iter()
            .filter(|e| e.sequence >= min && e.sequence <= max)
            .cloned()
            .collect()
    }

    /// Catch-up read: all retained events with sequence > `last_seen`.
    ///
    /// The second element is true when `last_seen` falls below the ring's
    /// floor (`last_seen < min_seq - 1`), meaning events were evicted and the
    /// caller must surface a gap.
    pub fn sync_from(&self, last_seen: u64) -> (Vec<Arc<Event>>, bool) {
        let truncated = last_seen + 1 < self.min_seq();
        let events = self
            .events
            .iter()
            .filter(|e| e.sequence > last_seen)
            .cloned()
            .collect();
        (events, truncated)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
#[path = "ring_tests.rs"]
mod tests;
