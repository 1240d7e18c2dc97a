//! Changed paths waiting for the next commit, and the commit message
//! summarising them

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::types::{Event, EventKind};

/// Names listed per kind before the rest is counted
pub const MAX_SUMMARY_NAMES: usize = 3;

/// Message used when a sync wasn't caused by local changes
pub const FALLBACK_MESSAGE: &str = "treesync: sync";

/// Latest kind per changed path, relative to the sync root
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    paths: BTreeMap<PathBuf, EventKind>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, root: &Path, event: &Event) {
        let path = event.path.strip_prefix(root).unwrap_or(&event.path);
        self.paths.insert(path.to_path_buf(), event.kind);
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Take everything recorded so far, leaving this set empty
    pub fn take(&mut self) -> ChangeSet {
        std::mem::take(self)
    }

    /// Put back changes from a sync that didn't commit them. Anything
    /// recorded since then is newer and wins.
    pub fn restore(&mut self, older: ChangeSet) {
        for (path, kind) in older.paths {
            self.paths.entry(path).or_insert(kind);
        }
    }

    /// One-line summary, e.g. `New: a.txt; Edit: b.txt, c.txt and 2 more`
    pub fn message(&self) -> String {
        if self.paths.is_empty() {
            return FALLBACK_MESSAGE.to_string();
        }

        let mut by_kind: BTreeMap<EventKind, Vec<String>> = BTreeMap::new();
        for (path, kind) in &self.paths {
            by_kind
                .entry(*kind)
                .or_default()
                .push(path.display().to_string());
        }

        by_kind
            .into_iter()
            .map(|(kind, names)| format!("{}: {}", kind.label(), list_names(&names)))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

fn list_names(names: &[String]) -> String {
    let shown = names
        .iter()
        .take(MAX_SUMMARY_NAMES)
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");
    if names.len() > MAX_SUMMARY_NAMES {
        format!("{} and {} more", shown, names.len() - MAX_SUMMARY_NAMES)
    } else {
        shown
    }
}
