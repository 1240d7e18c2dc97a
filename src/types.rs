//! Core types shared between the watcher, the relay and the scheduler

use std::fmt;
use std::path::PathBuf;

/// What happened to a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Created,
    Modified,
    Deleted,
    Moved,
}

impl EventKind {
    /// Short label used in commit summaries
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::Created => "New",
            EventKind::Modified => "Edit",
            EventKind::Deleted => "Del",
            EventKind::Moved => "Move",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Created => "created",
            EventKind::Modified => "modified",
            EventKind::Deleted => "deleted",
            EventKind::Moved => "moved",
        };
        f.write_str(s)
    }
}

/// A coalesced filesystem change, one per path per flush
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub path: PathBuf,
    pub kind: EventKind,
}

impl Event {
    pub fn new(path: impl Into<PathBuf>, kind: EventKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Where an inbound peer wakeup came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeupSource {
    /// Line received from the central relay server
    Relay,
    /// Datagram received on the local broadcast channel
    Broadcast,
}

/// "Something changed on a peer, go sync"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wakeup {
    pub source: WakeupSource,
}

impl Wakeup {
    pub fn relay() -> Self {
        Self {
            source: WakeupSource::Relay,
        }
    }

    pub fn broadcast() -> Self {
        Self {
            source: WakeupSource::Broadcast,
        }
    }
}

/// Outcome of a commit that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// A new commit was recorded
    Committed,
    /// The working tree had nothing staged; not an error
    NothingToCommit,
}

impl CommitOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, CommitOutcome::Committed)
    }
}
