//! The concurrent session table: peer address → live session handle.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, RwLock};

use crate::hooks::AppMessage;
use crate::protocol::reliability::Reliability;
use crate::protocol::state::DisconnectReason;

/// Work fed to a session task over its single-consumer queue.
#[derive(Debug)]
pub enum SessionInput {
    /// A raw datagram received from the peer.
    Datagram(Bytes),
    /// An outbound application message from the upper layer.
    Send {
        message: AppMessage,
        reliability: Reliability,
        channel: u8,
    },
    /// Upper-layer disconnect.
    Disconnect {
        reason: DisconnectReason,
        notify_peer: bool,
    },
}

/// Shared handle to one session task. The receive path clones this out of
/// the table under the read lock and never blocks on the cleaner.
#[derive(Clone)]
pub struct SessionHandle {
    pub input: mpsc::Sender<SessionInput>,
    pub evicted: Arc<AtomicBool>,
    /// Set once the connected-mode login completes.
    pub established: Arc<AtomicBool>,
    pub created_at: Instant,
}

impl SessionHandle {
    pub fn is_evicted(&self) -> bool {
        self.evicted.load(Ordering::Acquire)
    }

    pub fn is_established(&self) -> bool {
        self.established.load(Ordering::Acquire)
    }
}

/// Concurrent map of peer address → session handle. At most one session
/// per peer exists at any moment; `insert_if_absent` is the only way in.
#[derive(Default)]
pub struct SessionTable {
    inner: RwLock<FxHashMap<SocketAddr, SessionHandle>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, peer: SocketAddr) -> Option<SessionHandle> {
        self.inner.read().await.get(&peer).cloned()
    }

    /// Atomic insert: returns `false` and leaves the table untouched when
    /// the peer already has a session.
    pub async fn insert_if_absent(&self, peer: SocketAddr, handle: SessionHandle) -> bool {
        let mut table = self.inner.write().await;
        if table.contains_key(&peer) {
            return false;
        }
        table.insert(peer, handle);
        true
    }

    pub async fn remove(&self, peer: SocketAddr) -> Option<SessionHandle> {
        self.inner.write().await.remove(&peer)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Cloned view for the cleaner; eviction decisions happen outside the
    /// lock.
    pub async fn snapshot_for_cleanup(&self) -> Vec<(SocketAddr, SessionHandle)> {
        self.inner
            .read()
            .await
            .iter()
            .map(|(&peer, handle)| (peer, handle.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> SessionHandle {
        let (tx, _rx) = mpsc::channel(1);
        SessionHandle {
            input: tx,
            evicted: Arc::new(AtomicBool::new(false)),
            established: Arc::new(AtomicBool::new(false)),
            created_at: Instant::now(),
        }
    }

    #[tokio::test]
    async fn insert_if_absent_is_exclusive() {
        let table = SessionTable::new();
        let peer: SocketAddr = "127.0.0.1:19132".parse().unwrap();

        assert!(table.insert_if_absent(peer, handle()).await);
        assert!(!table.insert_if_absent(peer, handle()).await);
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn remove_frees_the_slot() {
        let table = SessionTable::new();
        let peer: SocketAddr = "127.0.0.1:19132".parse().unwrap();

        table.insert_if_absent(peer, handle()).await;
        assert!(table.remove(peer).await.is_some());
        assert!(table.get(peer).await.is_none());
        assert!(table.insert_if_absent(peer, handle()).await);
    }

    #[tokio::test]
    async fn snapshot_reflects_contents() {
        let table = SessionTable::new();
        for port in [1000u16, 1001, 1002] {
            let peer: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
            table.insert_if_absent(peer, handle()).await;
        }
        assert_eq!(table.snapshot_for_cleanup().await.len(), 3);
    }
}
