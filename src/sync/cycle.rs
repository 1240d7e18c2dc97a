//! One sync cycle against the storage backend
//!
//! `Probing → Pulling → Staging → Committing`. Runs on a blocking thread;
//! the scheduler reads the outcome once it is done.

use std::fmt;

use crate::error::SyncError;
use crate::storage::StorageBackend;
use crate::types::CommitOutcome;

/// Backend step of a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStep {
    Probing,
    Pulling,
    Staging,
    Committing,
}

impl fmt::Display for CycleStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CycleStep::Probing => "probing",
            CycleStep::Pulling => "pulling",
            CycleStep::Staging => "staging",
            CycleStep::Committing => "committing",
        };
        f.write_str(s)
    }
}

/// What a cycle did
#[derive(Debug, Default)]
pub struct CycleOutcome {
    /// Result of the probe, if it ran
    pub online: Option<bool>,
    /// Result of the commit, if it ran
    pub commit: Option<CommitOutcome>,
    /// The step that failed and why
    pub failure: Option<(CycleStep, SyncError)>,
}

impl CycleOutcome {
    pub fn committed(&self) -> bool {
        self.commit.is_some_and(|c| c.is_committed())
    }

    fn failed(mut self, step: CycleStep, error: SyncError) -> Self {
        self.failure = Some((step, error));
        self
    }
}

/// Run a full cycle. `pull_settled` is called exactly once, as soon as the
/// working tree can no longer change because of a pull. Its argument says
/// whether a pull actually went through and may have touched files.
///
/// Offline, the pull is skipped and local changes are still committed.
pub fn run_cycle(
    backend: &dyn StorageBackend,
    message: &str,
    pull_settled: impl FnOnce(bool),
) -> CycleOutcome {
    let online = backend.is_online();
    let outcome = CycleOutcome {
        online: Some(online),
        ..CycleOutcome::default()
    };

    if online {
        let pulled = backend.pull();
        pull_settled(pulled.is_ok());
        if let Err(e) = pulled {
            return outcome.failed(CycleStep::Pulling, e);
        }
    } else {
        pull_settled(false);
    }

    if let Err(e) = backend.add_all() {
        return outcome.failed(CycleStep::Staging, e);
    }

    match backend.commit(message) {
        Ok(commit) => CycleOutcome {
            commit: Some(commit),
            ..outcome
        },
        Err(e) => outcome.failed(CycleStep::Committing, e),
    }
}

/// Online/offline tracking. Only reports actual transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnlineState {
    online: bool,
}

/// A change of connectivity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    WentOnline,
    WentOffline,
}

impl Default for OnlineState {
    fn default() -> Self {
        Self { online: true }
    }
}

impl OnlineState {
    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Record a probe result
    pub fn update(&mut self, online: bool) -> Option<Transition> {
        if online == self.online {
            return None;
        }
        self.online = online;
        Some(if online {
            Transition::WentOnline
        } else {
            Transition::WentOffline
        })
    }
}
