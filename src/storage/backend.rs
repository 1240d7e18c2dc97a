//! Storage backend trait
//!
//! Everything that talks to the version-control tool sits behind
//! [`StorageBackend`], so the scheduler can be exercised without a repository.

use crate::error::Result;
use crate::types::CommitOutcome;

/// Version-controlled store behind the synchronised directory.
///
/// # Design Principles
///
/// 1. **Sync Interface**: every method blocks on a subprocess. Callers on an
///    async runtime go through `tokio::task::spawn_blocking`.
///
/// 2. **Benign outcomes are not errors**: a commit with nothing staged returns
///    `Ok(CommitOutcome::NothingToCommit)`.
///
/// 3. **Immutable Self**: methods take `&self` so one backend can be shared
///    behind an `Arc` by the scheduler and its blocking jobs.
pub trait StorageBackend: Send + Sync {
    /// Verify the directory is a usable store
    fn check(&self) -> Result<()>;

    /// Can the remote store be reached right now?
    fn is_online(&self) -> bool;

    /// Bring remote changes into the working tree
    fn pull(&self) -> Result<()>;

    /// Stage every change in the working tree, deletions included
    fn add_all(&self) -> Result<()>;

    /// Record staged changes
    fn commit(&self, message: &str) -> Result<CommitOutcome>;

    /// Publish local commits to the remote store
    fn push(&self) -> Result<()>;

    /// Backend name for logs
    fn name(&self) -> &str {
        "storage"
    }
}
