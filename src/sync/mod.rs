//! Sync scheduling
//!
//! Turns filesystem events, peer wakeups and timers into backend work:
//! debounced sync cycles (probe, pull, stage, commit) and batched pushes,
//! each single-flight.

mod changes;
mod cycle;
mod debounce;
mod scheduler;

pub use changes::{ChangeSet, FALLBACK_MESSAGE, MAX_SUMMARY_NAMES};
pub use cycle::{run_cycle, CycleOutcome, CycleStep, OnlineState, Transition};
pub use debounce::Debouncer;
pub use scheduler::{SchedulerConfig, SyncScheduler};
