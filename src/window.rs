//! # Timestamp Window
//! Bounded sliding window of event timestamps for one (actor, channel) pair.
//!
//! Timestamps are kept sorted (oldest first) and trimmed lazily whenever the
//! owner touches the window. The capacity bound keeps a flooding actor from
//! growing the state without limit; the oldest entries go first.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimestampWindow {
    stamps: VecDeque<DateTime<Utc>>,
}

impl TimestampWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event at `ts`, evicting the oldest entries beyond `capacity`.
    pub fn push(&mut self, ts: DateTime<Utc>, capacity: usize) {
        // Out-of-order delivery is rare; keep the queue sorted anyway.
        let pos = self.stamps.partition_point(|&t| t <= ts);
        self.stamps.insert(pos, ts);
        while self.stamps.len() > capacity.max(1) {
            self.stamps.pop_front();
        }
    }

    /// Drop every timestamp that is `window` or more older than `now`.
    ///
    /// Uses `retain` rather than popping from the front so snapshots written
    /// by older builds (unsorted) are still trimmed correctly.
    pub fn trim(&mut self, now: DateTime<Utc>, window: Duration) -> usize {
        let before = self.stamps.len();
        self.stamps.retain(|&t| is_fresh(t, now, window));
        before - self.stamps.len()
    }

    /// Number of timestamps younger than `window` at `now`.
    pub fn count_fresh(&self, now: DateTime<Utc>, window: Duration) -> usize {
        self.stamps
            .iter()
            .filter(|&&t| is_fresh(t, now, window))
            .count()
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DateTime<Utc>> {
        self.stamps.iter()
    }
}

fn is_fresh(t: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    now.signed_duration_since(t) < window
}
