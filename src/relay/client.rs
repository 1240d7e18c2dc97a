//! Relay client: one outbound connection to the relay server
//!
//! The link is best-effort. Any read error or EOF drops the connection and
//! the client keeps reconnecting at a fixed interval for as long as the
//! process lives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::MAX_LINE_LEN;
use crate::error::{Result, SyncError};
use crate::types::Wakeup;

/// Shared write side of the current connection, if any
#[derive(Clone, Default)]
pub struct RemoteLinkHandle {
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    connected: Arc<AtomicBool>,
}

impl RemoteLinkHandle {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Write one line to the server. Fails if there is no live connection.
    pub async fn send(&self, line: &str) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| SyncError::Transport("not connected to relay".to_string()))?;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))
    }

    async fn attach(&self, writer: OwnedWriteHalf) {
        *self.writer.lock().await = Some(writer);
        self.connected.store(true, Ordering::SeqCst);
    }

    async fn detach(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.writer.lock().await.take();
    }
}

/// Background connection to the relay server
pub struct RemoteLink {
    addr: String,
    retry: Duration,
}

impl RemoteLink {
    pub fn new(addr: impl Into<String>, retry: Duration) -> Self {
        Self {
            addr: addr.into(),
            retry,
        }
    }

    /// Run the link in the background. Each line received from the server
    /// becomes a [`Wakeup`] on `wakeups`.
    pub fn spawn(self, wakeups: mpsc::Sender<Wakeup>) -> (RemoteLinkHandle, JoinHandle<()>) {
        let handle = RemoteLinkHandle::default();
        let task = tokio::spawn(self.run(handle.clone(), wakeups));
        (handle, task)
    }

    async fn run(self, handle: RemoteLinkHandle, wakeups: mpsc::Sender<Wakeup>) {
        loop {
            let stream = self.connect_with_retry().await;
            let (read_half, write_half) = stream.into_split();
            handle.attach(write_half).await;
            tracing::info!("Connected to relay {}", self.addr);

            let keep_going = forward_lines(read_half, &wakeups).await;
            handle.detach().await;

            if !keep_going {
                tracing::debug!("Wakeup receiver gone, relay link stopping");
                return;
            }

            tracing::warn!("Relay read error - re-connecting in {:?}", self.retry);
            tokio::time::sleep(self.retry).await;
        }
    }

    async fn connect_with_retry(&self) -> TcpStream {
        loop {
            match TcpStream::connect(&self.addr).await {
                Ok(stream) => return stream,
                Err(e) => {
                    tracing::debug!("Relay {} unreachable: {}", self.addr, e);
                    tokio::time::sleep(self.retry).await;
                }
            }
        }
    }
}

/// Turn incoming lines into wakeups until the connection fails.
/// Returns false if the wakeup receiver has been dropped.
async fn forward_lines(read_half: OwnedReadHalf, wakeups: &mpsc::Sender<Wakeup>) -> bool {
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        match (&mut reader).take(MAX_LINE_LEN).read_line(&mut line).await {
            Ok(0) => return true,
            Ok(_) if !line.ends_with('\n') => return true,
            Ok(_) => {
                tracing::info!("Relay sent: {}", line.trim_end());
                match wakeups.try_send(Wakeup::relay()) {
                    // A full queue already holds a pending wakeup
                    Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
                    Err(mpsc::error::TrySendError::Closed(_)) => return false,
                }
            }
            Err(e) => {
                tracing::debug!("Relay read failed: {}", e);
                return true;
            }
        }
    }
}

/// Connect once, without retrying, and write `line`. Used by setup checks.
pub async fn probe(addr: &str, line: &str) -> Result<()> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|e| SyncError::Setup(format!("Cannot connect to relay server {}: {}", addr, e)))?;
    stream.write_all(line.as_bytes()).await.map_err(|e| {
        SyncError::Setup(format!("Cannot send data to relay server {}: {}", addr, e))
    })?;
    Ok(())
}
