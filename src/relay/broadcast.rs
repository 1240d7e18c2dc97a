//! Local subnet wakeups over UDP broadcast
//!
//! Broadcast delivery includes the sending host, so each datagram carries
//! the sender's instance id and receivers drop their own.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::WAKEUP_TOKEN;
use crate::error::Result;
use crate::types::Wakeup;

const MAX_DATAGRAM: usize = 1024;

/// UDP broadcast sender and receiver
pub struct BroadcastChannel {
    socket: UdpSocket,
    target: SocketAddr,
    instance: Uuid,
}

impl BroadcastChannel {
    /// Bind `bind_addr` and send to `target`
    pub async fn bind(bind_addr: SocketAddr, target: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.set_broadcast(true)?;
        Ok(Self {
            socket,
            target,
            instance: Uuid::new_v4(),
        })
    }

    /// Listen on `port` on all interfaces and broadcast to the whole subnet
    pub async fn subnet(port: u16) -> Result<Self> {
        Self::bind(
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            SocketAddr::from((Ipv4Addr::BROADCAST, port)),
        )
        .await
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Tell every instance on the subnet that something changed
    pub async fn announce(&self) -> Result<()> {
        let payload = format!("{} {}", WAKEUP_TOKEN, self.instance);
        self.socket.send_to(payload.as_bytes(), self.target).await?;
        tracing::info!("UDP broadcast sent");
        Ok(())
    }

    /// Wait for the next wakeup sent by another instance
    pub async fn recv_wakeup(&self) -> Result<Wakeup> {
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            let (len, from) = self.socket.recv_from(&mut buf).await?;
            let payload = String::from_utf8_lossy(&buf[..len]);
            if is_from(&payload, &self.instance) {
                continue;
            }
            tracing::info!("UDP msg received from {}: {}", from, payload.trim_end());
            return Ok(Wakeup::broadcast());
        }
    }

    /// Forward wakeups from other instances until `wakeups` is dropped
    pub fn spawn_listener(self: Arc<Self>, wakeups: mpsc::Sender<Wakeup>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match self.recv_wakeup().await {
                    Ok(wakeup) => match wakeups.try_send(wakeup) {
                        Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
                        Err(mpsc::error::TrySendError::Closed(_)) => break,
                    },
                    Err(e) => tracing::warn!("UDP receive failed: {}", e),
                }
            }
        })
    }
}

/// Whether a datagram was sent by `instance`
fn is_from(payload: &str, instance: &Uuid) -> bool {
    payload
        .split_whitespace()
        .nth(1)
        .and_then(|id| Uuid::parse_str(id).ok())
        .map(|id| id == *instance)
        .unwrap_or(false)
}
