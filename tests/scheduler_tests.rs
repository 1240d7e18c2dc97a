//! Scheduler integration tests against a scripted backend
//!
//! Run with: cargo test --test scheduler_tests

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use treesync::alerts::Notifier;
use treesync::relay::Announcer;
use treesync::storage::StorageBackend;
use treesync::sync::{SchedulerConfig, SyncScheduler, FALLBACK_MESSAGE};
use treesync::{CommitOutcome, Event, EventKind, Result, SyncError, Wakeup};

const ROOT: &str = "/srv/notes";

// =============================================================================
// Test doubles
// =============================================================================

#[derive(Default)]
struct ScriptedBackend {
    online: Mutex<VecDeque<bool>>,
    pull_failures: Mutex<VecDeque<bool>>,
    push_failures: Mutex<VecDeque<bool>>,
    pull_delay: Mutex<Duration>,
    nothing_to_commit: Mutex<bool>,
    during_pull: Mutex<Option<mpsc::Sender<Event>>>,
    commits: Mutex<Vec<String>>,
    pulls: AtomicUsize,
    pushes: AtomicUsize,
    /// Commit count seen by each push
    pushed_after: Mutex<Vec<usize>>,
}

impl ScriptedBackend {
    fn commits(&self) -> Vec<String> {
        self.commits.lock().clone()
    }

    fn commit_count(&self) -> usize {
        self.commits.lock().len()
    }

    fn push_count(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }
}

impl StorageBackend for ScriptedBackend {
    fn check(&self) -> Result<()> {
        Ok(())
    }

    fn is_online(&self) -> bool {
        self.online.lock().pop_front().unwrap_or(true)
    }

    fn pull(&self) -> Result<()> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        if let Some(tx) = self.during_pull.lock().take() {
            // Files written by the merge show up as watcher events
            tx.blocking_send(Event::new(format!("{}/pulled.txt", ROOT), EventKind::Created))
                .unwrap();
            std::thread::sleep(Duration::from_millis(100));
        }
        let delay = *self.pull_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if self.pull_failures.lock().pop_front().unwrap_or(false) {
            return Err(SyncError::Backend {
                command: "git merge origin/master".to_string(),
                status: 128,
                output: "merge conflict".to_string(),
            });
        }
        Ok(())
    }

    fn add_all(&self) -> Result<()> {
        Ok(())
    }

    fn commit(&self, message: &str) -> Result<CommitOutcome> {
        self.commits.lock().push(message.to_string());
        if *self.nothing_to_commit.lock() {
            Ok(CommitOutcome::NothingToCommit)
        } else {
            Ok(CommitOutcome::Committed)
        }
    }

    fn push(&self) -> Result<()> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        self.pushed_after.lock().push(self.commit_count());
        if self.push_failures.lock().pop_front().unwrap_or(false) {
            return Err(SyncError::Backend {
                command: "git push origin".to_string(),
                status: 1,
                output: "rejected".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    infos: Mutex<Vec<String>>,
    warnings: Mutex<Vec<String>>,
}

impl Notifier for RecordingNotifier {
    fn info(&self, message: &str) {
        self.infos.lock().push(message.to_string());
    }

    fn warn(&self, message: &str) {
        self.warnings.lock().push(message.to_string());
    }
}

#[derive(Default)]
struct CountingAnnouncer {
    count: AtomicUsize,
}

impl Announcer for CountingAnnouncer {
    fn announce(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    backend: Arc<ScriptedBackend>,
    notifier: Arc<RecordingNotifier>,
    announcer: Arc<CountingAnnouncer>,
    events: mpsc::Sender<Event>,
    wakeups: mpsc::Sender<Wakeup>,
    task: JoinHandle<()>,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        root: PathBuf::from(ROOT),
        sync_debounce: Duration::from_millis(100),
        max_sync_delay: Duration::from_millis(400),
        push_delay: Duration::from_millis(100),
        periodic: None,
        feedback_grace: Duration::from_millis(50),
    }
}

fn start(backend: ScriptedBackend, config: SchedulerConfig) -> Harness {
    let backend = Arc::new(backend);
    let notifier = Arc::new(RecordingNotifier::default());
    let announcer = Arc::new(CountingAnnouncer::default());
    let (events, events_rx) = mpsc::channel(64);
    let (wakeups, wakeups_rx) = mpsc::channel(8);

    let scheduler = SyncScheduler::new(
        backend.clone(),
        notifier.clone(),
        announcer.clone(),
        config,
    );
    let task = tokio::spawn(scheduler.run(events_rx, wakeups_rx));

    Harness {
        backend,
        notifier,
        announcer,
        events,
        wakeups,
        task,
    }
}

async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let reached = timeout(Duration::from_secs(3), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for {}", what);
}

/// Wait for the startup cycle and for its pull grace window to pass, so
/// later events restart the debounce
async fn startup_done(h: &Harness) {
    wait_for("startup commit", || h.backend.commit_count() == 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
}

fn changed(name: &str) -> Event {
    Event::new(format!("{}/{}", ROOT, name), EventKind::Modified)
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_startup_sync_runs_once() {
    let h = start(ScriptedBackend::default(), fast_config());

    wait_for("startup commit", || h.backend.commit_count() == 1).await;
    assert_eq!(h.backend.commits(), vec![FALLBACK_MESSAGE.to_string()]);
    assert_eq!(h.backend.pulls.load(Ordering::SeqCst), 1);

    // Startup state is online: no transition to report
    assert!(h.notifier.infos.lock().is_empty());
}

#[tokio::test]
async fn test_burst_of_changes_gives_one_cycle() {
    let h = start(ScriptedBackend::default(), fast_config());
    startup_done(&h).await;

    for name in ["a.txt", "b.txt", "c.txt"] {
        h.events.send(changed(name)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    wait_for("second commit", || h.backend.commit_count() == 2).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.backend.commit_count(), 2);
    assert_eq!(h.backend.commits()[1], "Edit: a.txt, b.txt, c.txt");
}

#[tokio::test]
async fn test_nothing_to_commit_is_quiet() {
    let backend = ScriptedBackend::default();
    *backend.nothing_to_commit.lock() = true;
    let h = start(backend, fast_config());

    wait_for("startup commit", || h.backend.commit_count() == 1).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(h.notifier.warnings.lock().is_empty());
    assert_eq!(h.backend.push_count(), 0);
    assert_eq!(h.announcer.count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_only_online_transitions_are_reported() {
    let backend = ScriptedBackend::default();
    backend
        .online
        .lock()
        .extend([true, true, false, false, true]);
    let h = start(backend, fast_config());

    wait_for("startup commit", || h.backend.commit_count() == 1).await;
    for n in 2..=5 {
        h.wakeups.send(Wakeup::relay()).await.unwrap();
        wait_for("commit after wakeup", || h.backend.commit_count() == n).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let offline: Vec<String> = h
        .notifier
        .warnings
        .lock()
        .iter()
        .filter(|w| w.contains("offline"))
        .cloned()
        .collect();
    assert_eq!(offline, vec!["Working offline".to_string()]);
    assert_eq!(*h.notifier.infos.lock(), vec!["Back online".to_string()]);
}

#[tokio::test]
async fn test_commits_batch_into_one_push() {
    let config = SchedulerConfig {
        sync_debounce: Duration::from_millis(50),
        push_delay: Duration::from_millis(500),
        ..fast_config()
    };
    let h = start(ScriptedBackend::default(), config);

    startup_done(&h).await;
    h.events.send(changed("a.txt")).await.unwrap();
    wait_for("second commit", || h.backend.commit_count() == 2).await;
    assert_eq!(h.backend.push_count(), 0);

    wait_for("push", || h.backend.push_count() == 1).await;
    wait_for("announce", || h.announcer.count.load(Ordering::SeqCst) == 1).await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(h.backend.push_count(), 1);
}

#[tokio::test]
async fn test_offline_commit_is_pushed_when_back_online() {
    let backend = ScriptedBackend::default();
    backend.online.lock().push_back(false);
    let h = start(backend, fast_config());

    wait_for("offline commit", || h.backend.commit_count() == 1).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.backend.push_count(), 0);
    assert_eq!(*h.notifier.warnings.lock(), vec!["Working offline".to_string()]);

    h.wakeups.send(Wakeup::broadcast()).await.unwrap();
    wait_for("push once online", || h.backend.push_count() == 1).await;
    assert_eq!(*h.notifier.infos.lock(), vec!["Back online".to_string()]);
}

#[tokio::test]
async fn test_pull_failure_warns_and_keeps_running() {
    let backend = ScriptedBackend::default();
    backend.pull_failures.lock().push_back(true);
    let h = start(backend, fast_config());

    wait_for("failure warning", || !h.notifier.warnings.lock().is_empty()).await;
    assert!(h.notifier.warnings.lock()[0].starts_with("Sync failed while pulling"));
    assert_eq!(h.backend.commit_count(), 0);

    h.wakeups.send(Wakeup::relay()).await.unwrap();
    wait_for("commit after recovery", || h.backend.commit_count() == 1).await;
}

#[tokio::test]
async fn test_changes_survive_failed_cycle() {
    let backend = ScriptedBackend::default();
    let h = start(backend, fast_config());
    startup_done(&h).await;

    h.backend.pull_failures.lock().push_back(true);
    h.events.send(changed("kept.txt")).await.unwrap();
    wait_for("failure warning", || !h.notifier.warnings.lock().is_empty()).await;

    h.wakeups.send(Wakeup::relay()).await.unwrap();
    wait_for("retry commit", || h.backend.commit_count() == 2).await;
    assert_eq!(h.backend.commits()[1], "Edit: kept.txt");
}

#[tokio::test]
async fn test_wakeup_skips_debounce() {
    let config = SchedulerConfig {
        sync_debounce: Duration::from_secs(30),
        max_sync_delay: Duration::from_secs(60),
        ..fast_config()
    };
    let h = start(ScriptedBackend::default(), config);
    startup_done(&h).await;

    h.events.send(changed("draft.md")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.wakeups.send(Wakeup::relay()).await.unwrap();

    wait_for("commit after wakeup", || h.backend.commit_count() == 2).await;
    assert_eq!(h.backend.commits()[1], "Edit: draft.md");
}

#[tokio::test]
async fn test_pull_echo_does_not_trigger_sync() {
    let h = start(ScriptedBackend::default(), fast_config());
    // The first pull is the startup one; hook in before it runs
    *h.backend.during_pull.lock() = Some(h.events.clone());

    wait_for("startup commit", || h.backend.commit_count() == 1).await;
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(h.backend.commit_count(), 1);
    assert_eq!(h.backend.pulls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_edit_right_after_sync_is_committed() {
    let config = SchedulerConfig {
        feedback_grace: Duration::from_millis(300),
        ..fast_config()
    };
    let h = start(ScriptedBackend::default(), config);

    wait_for("startup commit", || h.backend.commit_count() == 1).await;
    // Saved just after the sync finished
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.events.send(changed("user-edit.txt")).await.unwrap();

    wait_for("commit of the edit", || h.backend.commit_count() == 2).await;
    assert_eq!(h.backend.commits()[1], "Edit: user-edit.txt");
}

#[tokio::test]
async fn test_edit_after_offline_sync_is_committed() {
    let backend = ScriptedBackend::default();
    backend.online.lock().extend([false, false, false]);
    let config = SchedulerConfig {
        feedback_grace: Duration::from_millis(300),
        ..fast_config()
    };
    let h = start(backend, config);

    wait_for("startup commit", || h.backend.commit_count() == 1).await;
    // Saved just after the sync finished
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.events.send(changed("user-edit.txt")).await.unwrap();

    wait_for("commit of the edit", || h.backend.commit_count() == 2).await;
    assert_eq!(h.backend.commits()[1], "Edit: user-edit.txt");
}

#[tokio::test]
async fn test_failed_push_is_retried_after_next_cycle() {
    let backend = ScriptedBackend::default();
    backend.push_failures.lock().push_back(true);
    let h = start(backend, fast_config());

    wait_for("first push", || h.backend.push_count() == 1).await;
    wait_for("push warning", || {
        h.notifier
            .warnings
            .lock()
            .iter()
            .any(|w| w.starts_with("Push failed"))
    })
    .await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.backend.push_count(), 1);
    assert_eq!(h.announcer.count.load(Ordering::SeqCst), 0);

    *h.backend.nothing_to_commit.lock() = true;
    h.wakeups.send(Wakeup::relay()).await.unwrap();

    wait_for("retried push", || h.backend.push_count() == 2).await;
    wait_for("announce", || h.announcer.count.load(Ordering::SeqCst) == 1).await;
    assert_eq!(h.backend.commit_count(), 2);
}

#[tokio::test]
async fn test_push_waits_for_running_cycle() {
    let config = SchedulerConfig {
        push_delay: Duration::from_millis(300),
        ..fast_config()
    };
    let h = start(ScriptedBackend::default(), config);

    wait_for("startup commit", || h.backend.commit_count() == 1).await;
    *h.backend.pull_delay.lock() = Duration::from_millis(700);
    h.wakeups.send(Wakeup::relay()).await.unwrap();

    // The push comes due while the second cycle is still pulling
    wait_for("push", || h.backend.push_count() == 1).await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(*h.backend.pushed_after.lock(), vec![2]);
    assert_eq!(h.announcer.count.load(Ordering::SeqCst), 1);
}
