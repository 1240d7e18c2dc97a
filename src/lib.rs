//! treesync - keep a directory tree in sync across machines
//!
//! Changes under the sync directory are committed to a git clone, exchanged
//! with its remote, and announced to sibling instances through a relay
//! server and local UDP broadcast so they pull promptly instead of polling.

pub mod alerts;
pub mod checks;
pub mod config;
pub mod error;
pub mod relay;
pub mod storage;
pub mod sync;
pub mod types;
pub mod watcher;

pub use config::Config;
pub use error::{Result, SyncError};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
