//! User-facing notifications
//!
//! Messages go to small helper programs (for instance a `notify-send`
//! wrapper) so the daemon can run in the background and still tell the user
//! about going offline or a failed push. Delivery is best-effort.

use crate::config::Config;

/// Suggested contents for the info helper
pub const SUGGESTED_INFO_HELPER: &str = "#!/bin/sh\nnotify-send --urgency=low \"treesync\" \"$1\"";

/// Suggested contents for the alert helper
pub const SUGGESTED_ALERT_HELPER: &str =
    "#!/bin/sh\nnotify-send --urgency=critical \"treesync\" \"$1\"";

/// Fire-and-forget user notifications
pub trait Notifier: Send + Sync {
    /// Something the user may want to know, e.g. "back online"
    fn info(&self, message: &str);

    /// Something went wrong, e.g. a failed push
    fn warn(&self, message: &str);
}

/// Runs the configured helper programs with the message as only argument
#[derive(Debug, Clone)]
pub struct HelperNotifier {
    info_cmd: String,
    alert_cmd: String,
}

impl HelperNotifier {
    pub fn new(info_cmd: impl Into<String>, alert_cmd: impl Into<String>) -> Self {
        Self {
            info_cmd: info_cmd.into(),
            alert_cmd: alert_cmd.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.info_cmd, &config.alert_cmd)
    }

    /// Both helpers are configured as empty strings
    pub fn is_disabled(&self) -> bool {
        self.info_cmd.is_empty() && self.alert_cmd.is_empty()
    }

    fn run_helper(&self, cmd: &str, message: &str) {
        if cmd.is_empty() {
            return;
        }
        let cmd = cmd.to_string();
        let message = message.to_string();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = tokio::process::Command::new(&cmd).arg(&message).status().await
                    {
                        tracing::debug!("Helper {} failed: {}", cmd, e);
                    }
                });
            }
            Err(_) => {
                if let Err(e) = std::process::Command::new(&cmd).arg(&message).status() {
                    tracing::debug!("Helper {} failed: {}", cmd, e);
                }
            }
        }
    }

    /// Run the alert helper and wait for it. Used for fatal errors, when
    /// the process is about to exit.
    pub async fn alert_now(&self, message: &str) {
        tracing::error!("{}", message);
        if self.alert_cmd.is_empty() {
            return;
        }
        if let Err(e) = tokio::process::Command::new(&self.alert_cmd)
            .arg(message)
            .status()
            .await
        {
            tracing::debug!("Helper {} failed: {}", self.alert_cmd, e);
        }
    }
}

impl Notifier for HelperNotifier {
    fn info(&self, message: &str) {
        tracing::info!("{}", message);
        self.run_helper(&self.info_cmd, message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!("{}", message);
        self.run_helper(&self.alert_cmd, message);
    }
}

/// Only writes to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn info(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!("{}", message);
    }
}
