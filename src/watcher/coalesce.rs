//! Per-path coalescing of raw filesystem notifications

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::time::Instant;

use crate::types::{Event, EventKind};

/// Accumulates raw notifications, keeping only the latest kind per path
#[derive(Debug, Default)]
pub struct Coalescer {
    pending: HashMap<PathBuf, EventKind>,
    first_seen: Option<Instant>,
}

impl Coalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a raw notification. A later kind for the same path replaces
    /// the earlier one.
    pub fn record(&mut self, path: PathBuf, kind: EventKind) {
        if self.first_seen.is_none() {
            self.first_seen = Some(Instant::now());
        }
        self.pending.insert(path, kind);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Time since the oldest notification in the current batch
    pub fn age(&self) -> Option<Duration> {
        self.first_seen.map(|t| t.elapsed())
    }

    /// Take the batch, one event per distinct path, ordered by path
    pub fn drain(&mut self) -> Vec<Event> {
        self.first_seen = None;
        let mut events: Vec<Event> = self
            .pending
            .drain()
            .map(|(path, kind)| Event { path, kind })
            .collect();
        events.sort_by(|a, b| a.path.cmp(&b.path));
        events
    }
}
