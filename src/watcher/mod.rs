//! Filesystem change watcher
//!
//! Subscribes to every directory under the sync root (except the store's
//! metadata directory), follows newly created directories, and coalesces
//! bursts of raw notifications into one [`Event`] per path.
//!
//! Raw notifications for one path within an idle quantum collapse into the
//! latest one. The batch is flushed once the quantum passes with no new
//! input, or when it grows older than `max_batch_age` under a continuous
//! stream of changes.

mod coalesce;
mod filter;

pub use coalesce::Coalescer;
pub use filter::{classify, PathFilter};

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::types::{Event, EventKind};

/// Stream of coalesced events
pub type EventStream = mpsc::Receiver<Event>;

/// Watcher tuning
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Directory name whose subtree is never watched nor reported
    pub metadata_dir: String,
    /// Idle time after which the batch is flushed
    pub quantum: Duration,
    /// Flush even under continuous input once the batch is this old
    pub max_batch_age: Duration,
    /// Capacity of the outbound event channel
    pub channel_capacity: usize,
}

impl Default for WatchOptions {
    fn default() -> Self {
        let quantum = Duration::from_millis(100);
        Self {
            metadata_dir: crate::config::DEFAULT_METADATA_DIR.to_string(),
            quantum,
            max_batch_age: quantum * 10,
            channel_capacity: 1024,
        }
    }
}

impl WatchOptions {
    pub fn from_config(config: &Config) -> Self {
        let quantum = config.timings.coalesce();
        Self {
            metadata_dir: config.metadata_dir.clone(),
            quantum,
            max_batch_age: quantum * 10,
            ..Self::default()
        }
    }
}

/// Start watching `root`.
///
/// Must be called from within a tokio runtime. Fails if the root cannot be
/// watched; problems with individual subdirectories are logged and skipped.
/// The watcher stops when the returned stream is dropped.
pub fn watch(root: &Path, options: WatchOptions) -> Result<EventStream> {
    let root = root.canonicalize()?;
    let filter = PathFilter::new(&root, &options.metadata_dir);

    // Unbounded: the notify thread must never block on us while we are
    // inside `watcher.watch()` waiting on it.
    let (raw_tx, raw_rx) = mpsc::unbounded_channel();
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = raw_tx.send(res);
        },
        notify::Config::default(),
    )?;

    let dirs = subscribe_tree(&mut watcher, &root, &filter, |_| {})?;
    info!(root = %root.display(), dirs, "Watching");

    let (tx, rx) = mpsc::channel(options.channel_capacity);
    tokio::spawn(run(watcher, raw_rx, tx, filter, options));

    Ok(rx)
}

/// Subscribe to `top` and every directory below it, skipping excluded
/// subtrees. `on_entry` sees every non-excluded entry found on the way.
///
/// Each directory is subscribed before it is listed, so an entry created
/// in between is reported by one or the other. Only a failure to subscribe
/// to `top` is an error.
fn subscribe_tree<W: Watcher>(
    watcher: &mut W,
    top: &Path,
    filter: &PathFilter,
    mut on_entry: impl FnMut(&Path),
) -> Result<usize> {
    let mut stack = vec![top.to_path_buf()];
    let mut count = 0;

    while let Some(dir) = stack.pop() {
        if let Err(e) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
            if dir == top {
                return Err(e.into());
            }
            warn!("Cannot watch {}: {}", dir.display(), e);
            continue;
        }
        debug!("Watching {}", dir.display());
        count += 1;

        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot list {}: {}", dir.display(), e);
                continue;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if filter.is_excluded(&path) {
                continue;
            }
            on_entry(&path);
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                stack.push(path);
            }
        }
    }

    Ok(count)
}

/// Consume raw notifications and emit coalesced events
async fn run(
    mut watcher: RecommendedWatcher,
    mut raw_rx: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
    tx: mpsc::Sender<Event>,
    filter: PathFilter,
    options: WatchOptions,
) {
    let mut batch = Coalescer::new();

    loop {
        tokio::select! {
            raw = raw_rx.recv() => match raw {
                Some(Ok(event)) => absorb(&mut watcher, &filter, &mut batch, event),
                Some(Err(e)) => warn!("Watch error: {}", e),
                None => break,
            },
            _ = tokio::time::sleep(options.quantum), if !batch.is_empty() => {
                if !flush(&mut batch, &tx).await {
                    break;
                }
            }
        }

        let overdue = batch
            .age()
            .map(|age| age >= options.max_batch_age)
            .unwrap_or(false);
        if overdue && !flush(&mut batch, &tx).await {
            break;
        }
    }

    debug!(root = %filter.root().display(), "Watcher stopped");
}

/// Fold one raw notification into the batch, following new directories
fn absorb(
    watcher: &mut RecommendedWatcher,
    filter: &PathFilter,
    batch: &mut Coalescer,
    event: notify::Event,
) {
    let Some(kind) = classify(&event.kind) else {
        return;
    };

    for path in event.paths {
        if filter.is_excluded(&path) {
            continue;
        }

        if matches!(kind, EventKind::Created | EventKind::Moved) && path.is_dir() {
            follow_new_dir(watcher, filter, batch, &path);
        }

        batch.record(path, kind);
    }
}

/// Subscribe to a directory that just appeared. Anything already inside it
/// may have been created before the subscription took effect, so it is
/// reported as created.
///
/// The walk is synchronous and holds up this task for the whole new
/// subtree. Fine for a directory made by hand; moving a large tree into the
/// sync root stalls event delivery until every directory is subscribed.
/// `block_in_place` is not used because it panics on a current-thread
/// runtime.
fn follow_new_dir(
    watcher: &mut RecommendedWatcher,
    filter: &PathFilter,
    batch: &mut Coalescer,
    dir: &Path,
) {
    let mut found: Vec<PathBuf> = Vec::new();
    match subscribe_tree(watcher, dir, filter, |p| found.push(p.to_path_buf())) {
        Ok(n) => info!("Added watch on {} ({} dirs)", dir.display(), n),
        Err(e) => warn!("Cannot watch new directory {}: {}", dir.display(), e),
    }
    for path in found {
        batch.record(path, EventKind::Created);
    }
}

/// Send the whole batch. Returns false once nobody is listening.
async fn flush(batch: &mut Coalescer, tx: &mpsc::Sender<Event>) -> bool {
    for event in batch.drain() {
        debug!(path = %event.path.display(), kind = %event.kind, "Dispatching");
        if tx.send(event).await.is_err() {
            return false;
        }
    }
    true
}
