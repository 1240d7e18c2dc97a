//! Startup checks
//!
//! Anything that would make the daemon useless (no sync directory, not a
//! repository, unreachable relay server) is caught here, before the event
//! loop starts. Helper scripts and a relay address are optional and only
//! produce log messages.

use std::path::Path;

use crate::alerts::{SUGGESTED_ALERT_HELPER, SUGGESTED_INFO_HELPER};
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::relay::{probe, PROBE_LINE};
use crate::storage::{find_on_path, StorageBackend};

/// Run every check, stopping at the first fatal one
pub async fn run_checks(config: &Config, backend: &dyn StorageBackend) -> Result<()> {
    check_dir(&config.root())?;
    backend.check()?;
    tracing::info!("{} store at {} is usable", backend.name(), config.root().display());
    // An empty command turns the helper off
    if !config.info_cmd.is_empty() {
        check_helper(&config.info_cmd, SUGGESTED_INFO_HELPER);
    }
    if !config.alert_cmd.is_empty() {
        check_helper(&config.alert_cmd, SUGGESTED_ALERT_HELPER);
    }

    if let Some(addr) = relay_address(config) {
        tracing::info!("Connecting to sync server at {}", addr);
        probe(addr, PROBE_LINE).await?;
    }

    Ok(())
}

/// The sync directory must exist and be a directory
pub fn check_dir(dir: &Path) -> Result<()> {
    let meta = std::fs::metadata(dir)
        .map_err(|e| SyncError::Setup(format!("Cannot access {}: {}", dir.display(), e)))?;
    if !meta.is_dir() {
        return Err(SyncError::Setup(format!(
            "{} is not a directory",
            dir.display()
        )));
    }
    Ok(())
}

/// Report whether a helper program is available. Information only.
pub fn check_helper(cmd: &str, suggestion: &str) -> bool {
    match find_on_path(cmd) {
        Some(path) => {
            tracing::info!("Found helper: {}", path.display());
            true
        }
        None => {
            tracing::warn!(
                "Could not find executable '{}' in your PATH. It is needed to see messages \
                 when treesync runs in the background.\nSuggested contents:\n---\n{}\n---",
                cmd,
                suggestion
            );
            false
        }
    }
}

/// The configured relay server, logging a hint when there is none
pub fn relay_address(config: &Config) -> Option<&str> {
    let addr = config.server_addr.as_deref().filter(|a| !a.is_empty());
    if addr.is_none() {
        tracing::info!(
            "No sync server (--address) defined. Unless all your machines are on the same \
             local network, you will need one for sync to work."
        );
    }
    addr
}
