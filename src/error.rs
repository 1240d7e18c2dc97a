//! Error types for treesync

use thiserror::Error;

/// Result type alias for treesync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Main error type for treesync
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("{command} exited with status {status}: {output}")]
    Backend {
        command: String,
        status: i32,
        output: String,
    },

    #[error("Could not find '{0}' on PATH")]
    ToolNotFound(String),

    #[error("Setup error: {0}")]
    Setup(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Config file error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Errors that must abort the process at startup
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::ToolNotFound(_) | SyncError::Setup(_) | SyncError::Config(_)
        )
    }

    /// Exit status of a failed backend command, if that's what this is
    pub fn exit_status(&self) -> Option<i32> {
        match self {
            SyncError::Backend { status, .. } => Some(*status),
            _ => None,
        }
    }
}
