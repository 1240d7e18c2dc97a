//! Fan-out relay server
//!
//! Every line a peer sends is written to every other connected peer. The
//! server keeps no other state.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::MAX_LINE_LEN;
use crate::error::Result;

/// Connection ID
pub type PeerId = Uuid;

/// Lines queued per peer before further wakeups to it are dropped
const PEER_QUEUE: usize = 32;

/// Pause after a failed accept so a persistent error doesn't spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Live peer connections
///
/// Each peer is represented by the sending side of its outbound queue. A
/// broadcast enqueues without waiting, so a slow or stuck peer loses
/// wakeups instead of delaying everybody else.
#[derive(Default)]
pub struct PeerRegistry {
    peers: Mutex<HashMap<PeerId, mpsc::Sender<String>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new peer, returning its id and outbound queue
    pub fn register(&self) -> (PeerId, mpsc::Receiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(PEER_QUEUE);
        self.peers.lock().insert(id, tx);
        (id, rx)
    }

    /// Unregister a peer
    pub fn unregister(&self, id: &PeerId) {
        self.peers.lock().remove(id);
    }

    /// Get number of connected peers
    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    /// Queue `line` for every peer except `origin`. Returns how many peers
    /// accepted it.
    pub fn broadcast_from(&self, origin: &PeerId, line: &str) -> usize {
        let targets: Vec<(PeerId, mpsc::Sender<String>)> = self
            .peers
            .lock()
            .iter()
            .filter(|(id, _)| *id != origin)
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut delivered = 0;
        for (id, tx) in targets {
            match tx.try_send(line.to_string()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!("Peer {} is not keeping up, dropping message", id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }
}

/// TCP relay server
pub struct RelayServer {
    listener: TcpListener,
    registry: Arc<PeerRegistry>,
}

impl RelayServer {
    /// Bind the listening socket
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            registry: Arc::new(PeerRegistry::new()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> Arc<PeerRegistry> {
        self.registry.clone()
    }

    /// Accept peers forever
    pub async fn serve(self) -> Result<()> {
        tracing::info!("Relay listening on {}", self.local_addr()?);

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let registry = self.registry.clone();
                    tokio::spawn(handle_peer(stream, addr, registry));
                }
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }
}

/// Relay lines from one peer to the others until it disconnects
async fn handle_peer(stream: TcpStream, addr: SocketAddr, registry: Arc<PeerRegistry>) {
    let (id, mut outbound) = registry.register();
    tracing::info!("Peer connected: {} ({})", addr, id);

    let (read_half, mut write_half) = stream.into_split();

    let writer = tokio::spawn(async move {
        while let Some(line) = outbound.recv().await {
            if let Err(e) = write_half.write_all(line.as_bytes()).await {
                tracing::debug!("Write to {} failed: {}", addr, e);
                break;
            }
        }
    });

    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    loop {
        line.clear();
        match (&mut reader).take(MAX_LINE_LEN).read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) if !line.ends_with('\n') => {
                tracing::warn!("Peer {} sent an unterminated or oversized line", addr);
                break;
            }
            Ok(_) => {
                let sent = registry.broadcast_from(&id, &line);
                tracing::info!("Echoing {:?} from {} to {} peers", line.trim_end(), addr, sent);
            }
            Err(e) => {
                tracing::debug!("Read from {} failed: {}", addr, e);
                break;
            }
        }
    }

    registry.unregister(&id);
    writer.abort();
    tracing::info!("Peer disconnected: {} ({})", addr, id);
}
