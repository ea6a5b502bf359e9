//! # Playback Scheduling State
//!
//! Two pieces of bookkeeping decide when synthesized speech plays:
//!
//! - **PlaybackCursor**: the device-clock time at which the next inbound frame
//!   should start. Frames are placed back-to-back from the cursor rather than
//!   at their arrival time, so network jitter never introduces gaps or overlap.
//! - **ActiveSourceSet**: every frame that has been scheduled and has not yet
//!   finished. Interruption and shutdown stop everything in this set.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Handle of one scheduled playback buffer, allocated by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "src-{}", self.0)
    }
}

/// Start time for the next inbound frame, on the device clock.
///
/// Only `reset` may move the cursor backwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackCursor {
    next_start: Duration,
}

impl PlaybackCursor {
    pub fn new(now: Duration) -> Self {
        Self { next_start: now }
    }

    #[cfg(test)]
    pub fn position(&self) -> Duration {
        self.next_start
    }

    /// Reserve `duration` of playback and return where it starts.
    ///
    /// The start is clamped to `now`, so a cursor that has fallen behind the
    /// device clock never schedules into the past.
    pub fn schedule(&mut self, now: Duration, duration: Duration) -> Duration {
        let start = self.next_start.max(now);
        self.next_start = start + duration;
        start
    }

    pub fn reset(&mut self, now: Duration) {
        self.next_start = now;
    }
}

/// Frames scheduled on the device that have not finished yet.
#[derive(Debug, Default)]
pub struct ActiveSourceSet {
    sources: BTreeSet<SourceId>,
}

impl ActiveSourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source: SourceId) {
        self.sources.insert(source);
    }

    /// Returns false when the source was already gone (e.g. stopped by an interrupt).
    pub fn remove(&mut self, source: SourceId) -> bool {
        self.sources.remove(&source)
    }

    #[cfg(test)]
    pub fn contains(&self, source: SourceId) -> bool {
        self.sources.contains(&source)
    }

    /// Empty the set, returning its members in ascending order.
    pub fn drain(&mut self) -> Vec<SourceId> {
        std::mem::take(&mut self.sources).into_iter().collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
