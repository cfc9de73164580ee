mod offline;
mod online;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use rustc_hash::FxHashMap;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace};

use crate::config::ServerConfig;
use crate::error::RaknetError;
use crate::hooks::Hooks;
use crate::metrics::TransportMetrics;
use crate::protocol::constants::{
    is_offline_packet_id, CLEANER_INTERVAL, PENDING_CONNECTION_WINDOW, QUERY_MAGIC,
    RECV_BUFFER_SIZE,
};
use crate::protocol::state::DisconnectReason;
use crate::transport::table::{SessionInput, SessionTable};
use crate::transport::{ServerHandle, TransportEvent};

use offline::PendingConnection;

/// Server-side RakNet listener: owns the UDP socket, classifies incoming
/// datagrams, and multiplexes many peer sessions over one port.
pub struct RaknetServer {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    config: Arc<ServerConfig>,
    hooks: Hooks,
    metrics: Arc<TransportMetrics>,
    table: Arc<SessionTable>,
    event_tx: mpsc::Sender<TransportEvent>,
    server_guid: i64,
}

impl RaknetServer {
    /// Binds the socket and hands back the server, the upward event stream
    /// and a cloneable send handle. Startup failures abort here.
    pub async fn bind(
        config: ServerConfig,
        hooks: Hooks,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>, ServerHandle), RaknetError> {
        let addr = config.bind_addr()?;
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        let (event_tx, event_rx) = mpsc::channel(256);
        let table = Arc::new(SessionTable::new());
        let server_guid: i64 = rand::random();

        info!(%local_addr, server_guid, "raknet server bound");

        let handle = ServerHandle::new(table.clone());
        let server = RaknetServer {
            socket: Arc::new(socket),
            local_addr,
            config: Arc::new(config),
            hooks,
            metrics: Arc::new(TransportMetrics::default()),
            table,
            event_tx,
            server_guid,
        };
        Ok((server, event_rx, handle))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn server_guid(&self) -> i64 {
        self.server_guid
    }

    pub fn metrics(&self) -> Arc<TransportMetrics> {
        self.metrics.clone()
    }

    /// Receive loop. Classifies each datagram and either answers it inline
    /// (offline traffic) or enqueues it to the owning session task; the
    /// loop never blocks past that enqueue. Runs until the shutdown signal
    /// flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let pending: Arc<Mutex<FxHashMap<SocketAddr, PendingConnection>>> = Arc::default();

        tokio::spawn(run_cleaner(
            self.table.clone(),
            self.metrics.clone(),
            pending.clone(),
            shutdown.clone(),
        ));

        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        loop {
            tokio::select! {
                res = self.socket.recv_from(&mut buf) => {
                    match res {
                        Ok((len, peer)) => self.dispatch(&buf[..len], peer, &pending).await,
                        Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                            // Windows ICMP port unreachable; not fatal.
                            continue;
                        }
                        Err(e) => {
                            error!(error = %e, "udp receive error");
                            continue;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("raknet server shutting down");
                        self.shutdown().await;
                        break;
                    }
                }
            }
        }
    }

    /// §4.3 receive pipeline: telemetry, query magic, offline IDs, then
    /// session lookup.
    async fn dispatch(
        &self,
        bytes: &[u8],
        peer: SocketAddr,
        pending: &Mutex<FxHashMap<SocketAddr, PendingConnection>>,
    ) {
        TransportMetrics::incr(&self.metrics.packets_received);
        TransportMetrics::add(&self.metrics.bytes_received, bytes.len() as u64);

        let Some(&id) = bytes.first() else { return };

        if id == QUERY_MAGIC {
            if self.config.server.enable_query {
                if let Some(reply) = self.hooks.query.respond(peer, bytes) {
                    self.send_raw(&reply, peer).await;
                }
            }
            return;
        }

        if is_offline_packet_id(id) {
            offline::handle_offline(self, bytes, peer, pending).await;
            return;
        }

        match self.table.get(peer).await {
            None => {
                trace!(%peer, id = format_args!("0x{id:02X}"), "datagram from unknown peer dropped");
                TransportMetrics::incr(&self.metrics.dropped_datagrams);
            }
            Some(handle) if handle.is_evicted() => {
                TransportMetrics::incr(&self.metrics.dropped_datagrams);
            }
            Some(handle) => {
                let datagram = SessionInput::Datagram(Bytes::copy_from_slice(bytes));
                if handle.input.try_send(datagram).is_err() {
                    // Session queue full or gone; shed rather than block.
                    debug!(%peer, "session queue full, datagram dropped");
                    TransportMetrics::incr(&self.metrics.dropped_datagrams);
                }
            }
        }
    }

    pub(crate) async fn send_raw(&self, bytes: &[u8], peer: SocketAddr) {
        match self.socket.send_to(bytes, peer).await {
            Ok(n) => {
                TransportMetrics::incr(&self.metrics.packets_sent);
                TransportMetrics::add(&self.metrics.bytes_sent, n as u64);
            }
            Err(e) => trace!(%peer, error = %e, "udp send failed"),
        }
    }

    fn session_context(&self) -> online::SessionContext {
        online::SessionContext {
            socket: self.socket.clone(),
            config: self.config.clone(),
            hooks: self.hooks.clone(),
            metrics: self.metrics.clone(),
            event_tx: self.event_tx.clone(),
        }
    }

    async fn shutdown(&self) {
        for (_, handle) in self.table.snapshot_for_cleanup().await {
            let _ = handle
                .input
                .send(SessionInput::Disconnect {
                    reason: DisconnectReason::ShuttingDown,
                    notify_peer: true,
                })
                .await;
        }
    }
}

/// Coarse-interval pass removing evicted sessions from the table and
/// expiring stale handshake bookkeeping.
async fn run_cleaner(
    table: Arc<SessionTable>,
    metrics: Arc<TransportMetrics>,
    pending: Arc<Mutex<FxHashMap<SocketAddr, PendingConnection>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(CLEANER_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
                continue;
            }
        }

        for (peer, handle) in table.snapshot_for_cleanup().await {
            if handle.is_evicted() || handle.input.is_closed() {
                debug!(%peer, "cleaner removed session");
                table.remove(peer).await;
            }
        }
        metrics
            .session_count
            .store(table.len().await as u64, std::sync::atomic::Ordering::Relaxed);

        pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|_, p| p.first_seen.elapsed() < PENDING_CONNECTION_WINDOW);
    }
}
