//! The sync scheduler: the process's steady-state driver
//!
//! One `select!` loop owns every scheduling decision. Filesystem events arm a
//! debounced sync; peer wakeups and the periodic timer request one right
//! away. Backend work runs on blocking threads, one job at a time, and
//! reports back over an internal channel.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::changes::ChangeSet;
use super::cycle::{run_cycle, CycleOutcome, CycleStep, OnlineState, Transition};
use super::debounce::Debouncer;
use crate::alerts::Notifier;
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::relay::Announcer;
use crate::storage::StorageBackend;
use crate::types::{Event, Wakeup};

/// Scheduler tuning
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Sync root, used to shorten paths in commit messages
    pub root: PathBuf,
    /// Quiet period after the last local change
    pub sync_debounce: Duration,
    /// Upper bound on how long a burst of changes can postpone a sync
    pub max_sync_delay: Duration,
    /// Delay batching commits into one push
    pub push_delay: Duration,
    /// Safety-net sync interval
    pub periodic: Option<Duration>,
    /// How long after a pull watcher events may still be its echoes
    pub feedback_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            sync_debounce: Duration::from_secs(2),
            max_sync_delay: Duration::from_secs(8),
            push_delay: Duration::from_secs(10),
            periodic: Some(Duration::from_secs(600)),
            feedback_grace: Duration::from_millis(300),
        }
    }
}

impl SchedulerConfig {
    pub fn from_config(config: &Config) -> Self {
        let timings = &config.timings;
        Self {
            root: config.root(),
            sync_debounce: timings.sync_debounce(),
            max_sync_delay: timings.sync_debounce() * 4,
            push_delay: timings.push_delay(),
            periodic: timings.periodic_sync(),
            feedback_grace: timings.coalesce() * 3,
        }
    }
}

/// Why a sync was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Startup,
    LocalChange,
    Peer,
    Periodic,
}

/// Backend work in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    Cycle,
    Push,
}

/// Progress reported by backend jobs
#[derive(Debug)]
enum JobReport {
    PullSettled { pulled: bool },
    CycleDone(CycleOutcome),
    PushDone(Result<()>),
}

/// Whether watcher events may be echoes of our own pull
#[derive(Debug, Clone, Copy)]
enum Feedback {
    Open,
    /// A pull is writing the tree; events are dropped
    Pulling,
    /// A pull just finished; events are kept but don't postpone the sync
    GraceUntil(Instant),
}

/// Decides when to sync and push
pub struct SyncScheduler {
    backend: Arc<dyn StorageBackend>,
    notifier: Arc<dyn Notifier>,
    announcer: Arc<dyn Announcer>,
    config: SchedulerConfig,

    online: OnlineState,
    sync_timer: Debouncer,
    push_timer: Debouncer,
    job: Option<Job>,
    sync_requested: bool,
    push_waiting: bool,
    push_owed: bool,
    feedback: Feedback,
    changes: ChangeSet,
    in_flight: ChangeSet,

    reports_tx: mpsc::UnboundedSender<JobReport>,
    reports_rx: mpsc::UnboundedReceiver<JobReport>,
}

impl SyncScheduler {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        notifier: Arc<dyn Notifier>,
        announcer: Arc<dyn Announcer>,
        config: SchedulerConfig,
    ) -> Self {
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        Self {
            sync_timer: Debouncer::new(config.sync_debounce).with_max_delay(config.max_sync_delay),
            push_timer: Debouncer::new(config.push_delay),
            backend,
            notifier,
            announcer,
            config,
            online: OnlineState::default(),
            job: None,
            sync_requested: false,
            push_waiting: false,
            push_owed: false,
            feedback: Feedback::Open,
            changes: ChangeSet::new(),
            in_flight: ChangeSet::new(),
            reports_tx,
            reports_rx,
        }
    }

    /// Run forever. Starts with an unconditional sync to catch up with
    /// whatever happened while the process was stopped.
    ///
    /// A closed input channel is logged and ignored; the loop keeps going
    /// on whatever inputs remain.
    pub async fn run(mut self, events: mpsc::Receiver<Event>, wakeups: mpsc::Receiver<Wakeup>) {
        let mut events = Some(events);
        let mut wakeups = Some(wakeups);
        let mut periodic = self.config.periodic.map(periodic_interval);

        self.request_sync(Trigger::Startup);

        loop {
            tokio::select! {
                event = recv_or_pending(&mut events) => match event {
                    Some(event) => self.on_change(event),
                    None => {
                        warn!("Change watcher stopped");
                        events = None;
                    }
                },
                wakeup = recv_or_pending(&mut wakeups) => match wakeup {
                    Some(wakeup) => {
                        info!(source = ?wakeup.source, "Remote update notification");
                        self.request_sync(Trigger::Peer);
                    }
                    None => {
                        warn!("Remote listener stopped");
                        wakeups = None;
                    }
                },
                Some(report) = self.reports_rx.recv() => self.on_report(report),
                _ = self.sync_timer.fired() => self.request_sync(Trigger::LocalChange),
                _ = self.push_timer.fired() => self.on_push_due(),
                _ = tick_or_pending(&mut periodic) => self.request_sync(Trigger::Periodic),
            }
        }
    }

    fn on_change(&mut self, event: Event) {
        match self.feedback {
            Feedback::Pulling => {
                debug!(path = %event.path.display(), "Ignoring change made by pull");
                return;
            }
            Feedback::GraceUntil(until) if Instant::now() < until => {
                // Most likely an echo, but it may be a real edit: keep it
                debug!(path = %event.path.display(), kind = %event.kind, "Changed after pull");
                self.changes.record(&self.config.root, &event);
                self.sync_timer.arm();
                return;
            }
            _ => {}
        }
        debug!(path = %event.path.display(), kind = %event.kind, "Changed");
        self.changes.record(&self.config.root, &event);
        self.sync_timer.trigger();
    }

    /// Sync now, or right after the running job. Any pending debounce is
    /// covered by this sync.
    fn request_sync(&mut self, trigger: Trigger) {
        self.sync_timer.cancel();
        if let Some(job) = self.job {
            debug!(?trigger, ?job, "Backend busy, sync queued");
            self.sync_requested = true;
            return;
        }
        info!(?trigger, "Starting sync");
        self.start_cycle();
    }

    fn on_push_due(&mut self) {
        if !self.online.is_online() {
            debug!("Offline, push postponed");
            return;
        }
        if self.job.is_some() {
            self.push_waiting = true;
            return;
        }
        self.start_push();
    }

    fn start_cycle(&mut self) {
        self.sync_requested = false;
        self.job = Some(Job::Cycle);
        self.feedback = Feedback::Pulling;

        self.in_flight = self.changes.take();
        let message = self.in_flight.message();
        let backend = self.backend.clone();
        let reports = self.reports_tx.clone();

        tokio::spawn(async move {
            let settled = reports.clone();
            let joined = tokio::task::spawn_blocking(move || {
                run_cycle(backend.as_ref(), &message, move |pulled| {
                    let _ = settled.send(JobReport::PullSettled { pulled });
                })
            })
            .await;

            let outcome = joined.unwrap_or_else(|e| CycleOutcome {
                failure: Some((
                    CycleStep::Probing,
                    SyncError::Internal(format!("sync task failed: {}", e)),
                )),
                ..CycleOutcome::default()
            });
            let _ = reports.send(JobReport::CycleDone(outcome));
        });
    }

    fn start_push(&mut self) {
        // This push covers whatever the timer was waiting for
        self.push_timer.cancel();
        self.push_waiting = false;
        self.job = Some(Job::Push);
        info!("Pushing");

        let backend = self.backend.clone();
        let reports = self.reports_tx.clone();
        tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || backend.push())
                .await
                .unwrap_or_else(|e| Err(SyncError::Internal(format!("push task failed: {}", e))));
            let _ = reports.send(JobReport::PushDone(result));
        });
    }

    fn on_report(&mut self, report: JobReport) {
        match report {
            JobReport::PullSettled { pulled } => {
                self.feedback = if pulled {
                    Feedback::GraceUntil(Instant::now() + self.config.feedback_grace)
                } else {
                    Feedback::Open
                };
            }
            JobReport::CycleDone(outcome) => {
                self.job = None;
                if matches!(self.feedback, Feedback::Pulling) {
                    self.feedback = Feedback::Open;
                }
                self.finish_cycle(outcome);
                self.next_job();
            }
            JobReport::PushDone(result) => {
                self.job = None;
                match result {
                    Ok(()) => {
                        info!("Push complete, notifying peers");
                        self.push_owed = false;
                        self.announcer.announce();
                    }
                    Err(e) => self.notifier.warn(&format!("Push failed: {}", e)),
                }
                self.next_job();
            }
        }
    }

    fn finish_cycle(&mut self, outcome: CycleOutcome) {
        if let Some(online) = outcome.online {
            match self.online.update(online) {
                Some(Transition::WentOnline) => self.notifier.info("Back online"),
                Some(Transition::WentOffline) => self.notifier.warn("Working offline"),
                None => {}
            }
        }

        let in_flight = self.in_flight.take();

        if let Some((step, error)) = &outcome.failure {
            self.notifier
                .warn(&format!("Sync failed while {}: {}", step, error));
            self.changes.restore(in_flight);
            return;
        }

        if outcome.committed() {
            info!("Committed: {}", in_flight.message());
            self.push_owed = true;
        }

        if self.push_owed && self.online.is_online() && self.push_timer.arm() {
            debug!(delay = ?self.push_timer.delay(), "Push scheduled");
        }
    }

    /// Start whatever was queued while the backend was busy
    fn next_job(&mut self) {
        if self.job.is_some() {
            return;
        }
        if self.push_waiting && self.online.is_online() {
            self.start_push();
        } else if self.sync_requested {
            info!("Starting queued sync");
            self.start_cycle();
        }
    }
}

fn periodic_interval(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

async fn recv_or_pending<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn tick_or_pending(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
