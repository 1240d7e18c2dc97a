//! Storage backends for the synchronised tree
//!
//! The scheduler only sees the [`StorageBackend`] trait. The git adapter is
//! the one real implementation; tests substitute their own.

mod backend;
mod git;

pub use backend::StorageBackend;
pub use git::{find_on_path, CommandOutput, CommandRunner, GitBackend, ProcessRunner};
