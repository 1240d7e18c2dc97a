//! Peer wakeups
//!
//! Two independent transports let instances tell each other "I pushed,
//! go pull": a central fan-out [`RelayServer`] reached over TCP, and UDP
//! broadcast on the local subnet. The [`RemoteListener`] merges both into
//! one stream of [`Wakeup`]s for the scheduler and sends our own wakeups
//! out on both.

mod broadcast;
mod client;
mod server;

pub use broadcast::BroadcastChannel;
pub use client::{probe, RemoteLink, RemoteLinkHandle};
pub use server::{PeerId, PeerRegistry, RelayServer};

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::Config;
use crate::types::Wakeup;

/// Payload announcing a push
pub const WAKEUP_TOKEN: &str = "Updated";

/// Line sent by setup checks
pub const PROBE_LINE: &str = "Test\n";

/// Longest relay line accepted, newline included
pub const MAX_LINE_LEN: u64 = 4096;

/// Wakeups waiting for the scheduler. One pending wakeup is as good as many.
const WAKEUP_QUEUE: usize = 8;

/// Outbound side of the relay, used by the scheduler after a push
pub trait Announcer: Send + Sync {
    /// Tell peers something changed. Must not block.
    fn announce(&self);
}

/// Both wakeup transports, inbound and outbound
#[derive(Clone, Default)]
pub struct RemoteListener {
    link: Option<RemoteLinkHandle>,
    broadcast: Option<Arc<BroadcastChannel>>,
}

impl RemoteListener {
    /// Start whatever transports the configuration enables. Transport
    /// problems are logged, never fatal.
    pub async fn start(config: &Config) -> (Self, mpsc::Receiver<Wakeup>) {
        let (tx, rx) = mpsc::channel(WAKEUP_QUEUE);
        let mut listener = Self::default();

        if let Some(addr) = &config.server_addr {
            let link = RemoteLink::new(addr.clone(), config.timings.reconnect());
            let (handle, _task) = link.spawn(tx.clone());
            listener.link = Some(handle);
        }

        if config.broadcast.enabled {
            match BroadcastChannel::subnet(config.broadcast.port).await {
                Ok(channel) => {
                    tracing::info!(
                        instance = %channel.instance_id(),
                        "Local broadcast on port {}",
                        config.broadcast.port
                    );
                    let channel = Arc::new(channel);
                    channel.clone().spawn_listener(tx.clone());
                    listener.broadcast = Some(channel);
                }
                Err(e) => tracing::warn!(
                    "Local broadcast disabled, cannot bind port {}: {}",
                    config.broadcast.port,
                    e
                ),
            }
        }

        (listener, rx)
    }

    /// Build from already running transports
    pub fn from_parts(
        link: Option<RemoteLinkHandle>,
        broadcast: Option<Arc<BroadcastChannel>>,
    ) -> Self {
        Self { link, broadcast }
    }

    pub fn has_transport(&self) -> bool {
        self.link.is_some() || self.broadcast.is_some()
    }
}

impl Announcer for RemoteListener {
    fn announce(&self) {
        if let Some(link) = self.link.clone() {
            tokio::spawn(async move {
                let line = format!("{}\n", WAKEUP_TOKEN);
                if let Err(e) = link.send(&line).await {
                    tracing::debug!("Relay announce skipped: {}", e);
                }
            });
        }

        if let Some(channel) = self.broadcast.clone() {
            tokio::spawn(async move {
                if let Err(e) = channel.announce().await {
                    tracing::warn!("UDP broadcast failed: {}", e);
                }
            });
        }
    }
}
