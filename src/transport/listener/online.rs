//! Per-session task: the single consumer of a session's input queue. It
//! owns the [`Session`] state machine, drives its tick, and performs all
//! socket writes for that peer, so reliability state and transmission
//! never race.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::config::ServerConfig;
use crate::hooks::Hooks;
use crate::metrics::TransportMetrics;
use crate::protocol::constants::{SESSION_QUEUE_DEPTH, SESSION_TICK_INTERVAL};
use crate::protocol::packet::{
    ConnectedPong, ConnectionRequestAccepted, DisconnectNotification, RaknetPacket,
};
use crate::protocol::reliability::Reliability;
use crate::protocol::state::{DisconnectReason, SessionState};
use crate::protocol::types::RaknetTime;
use crate::session::{Session, SessionError};
use crate::transport::table::{SessionHandle, SessionInput};
use crate::transport::TransportEvent;

pub(super) struct SessionContext {
    pub socket: Arc<UdpSocket>,
    pub config: Arc<ServerConfig>,
    pub hooks: Hooks,
    pub metrics: Arc<TransportMetrics>,
    pub event_tx: mpsc::Sender<TransportEvent>,
}

/// Builds the handle and owning task for a freshly handshaken session.
/// The caller spawns the returned future only once the handle has won its
/// slot in the table.
pub(super) fn session_pair(
    ctx: SessionContext,
    peer: SocketAddr,
    mtu: u16,
    client_guid: i64,
) -> (SessionHandle, impl std::future::Future<Output = ()>) {
    let (input_tx, input_rx) = mpsc::channel(SESSION_QUEUE_DEPTH);
    let evicted = Arc::new(AtomicBool::new(false));
    let established = Arc::new(AtomicBool::new(false));

    let session = Session::new(peer, mtu, client_guid, ctx.metrics.clone());
    let task = run_session(
        session,
        input_rx,
        ctx,
        evicted.clone(),
        established.clone(),
    );

    let handle = SessionHandle {
        input: input_tx,
        evicted,
        established,
        created_at: Instant::now(),
    };
    (handle, task)
}

async fn run_session(
    mut session: Session,
    mut input: mpsc::Receiver<SessionInput>,
    ctx: SessionContext,
    evicted: Arc<AtomicBool>,
    established: Arc<AtomicBool>,
) {
    let peer = session.peer();
    let inactivity_timeout = ctx.config.inactivity_timeout();

    // ForceOrderingForAll decouples upward delivery from this task by
    // relaying events through a dedicated dispatcher; order is preserved
    // either way.
    let delivery_tx = if ctx.config.server.force_ordering_for_all {
        let (tx, mut rx) = mpsc::channel::<TransportEvent>(SESSION_QUEUE_DEPTH);
        let event_tx = ctx.event_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if event_tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        Some(tx)
    } else {
        None
    };

    let mut tick = tokio::time::interval(SESSION_TICK_INTERVAL);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            maybe_input = input.recv() => {
                match maybe_input {
                    None => break,
                    Some(SessionInput::Datagram(bytes)) => {
                        on_datagram(&mut session, &ctx, &delivery_tx, &established, bytes).await;
                    }
                    Some(SessionInput::Send { message, reliability, channel }) => {
                        let payload = ctx.hooks.codec.encode(&message);
                        trace_packet(&ctx, message.id, payload.len(), peer, "send");
                        session.queue_message(payload, reliability, channel);
                        transmit(&ctx, peer, session.flush(Instant::now())).await;
                    }
                    Some(SessionInput::Disconnect { reason, notify_peer }) => {
                        if notify_peer {
                            session.set_state(SessionState::Disconnecting);
                            session.queue_packet(
                                &RaknetPacket::DisconnectNotification(DisconnectNotification),
                                Reliability::ReliableOrdered,
                                0,
                            );
                            transmit(&ctx, peer, session.flush(Instant::now())).await;
                        }
                        session.evict(reason);
                    }
                }
            }
            _ = tick.tick() => {
                let out = session.tick(inactivity_timeout, Instant::now());
                transmit(&ctx, peer, out).await;
            }
        }

        if session.is_evicted() {
            break;
        }
    }

    evicted.store(true, Ordering::Release);
    let reason = session
        .disconnect_reason()
        .unwrap_or(DisconnectReason::Disconnected);
    info!(%peer, ?reason, "session ended");
    let _ = ctx
        .event_tx
        .send(TransportEvent::Disconnected { peer, reason })
        .await;
}

async fn on_datagram(
    session: &mut Session,
    ctx: &SessionContext,
    delivery_tx: &Option<mpsc::Sender<TransportEvent>>,
    established: &Arc<AtomicBool>,
    bytes: Bytes,
) {
    let peer = session.peer();
    let now = Instant::now();
    session.touch(now);

    match session.handle_datagram(&bytes[..], now) {
        Ok(outcome) => {
            // NAK-driven retransmissions go out first, from stored bytes.
            transmit(ctx, peer, outcome.resends).await;
            for payload in outcome.deliveries {
                handle_delivery(session, ctx, delivery_tx, established, payload).await;
            }
            transmit(ctx, peer, session.flush(now)).await;
        }
        Err(SessionError::Decode(e)) => {
            // Malformed datagram: drop it and blacklist the sender, other
            // sessions are untouched.
            debug!(%peer, error = %e, "malformed datagram, blacklisting peer");
            TransportMetrics::incr(&ctx.metrics.dropped_datagrams);
            ctx.hooks.admission.blacklist(peer.ip());
        }
        Err(SessionError::Split(e)) => {
            warn!(%peer, error = %e, "split reassembly failed, disconnecting");
            session.evict(DisconnectReason::SplitReassemblyFailed);
        }
    }
}

/// One complete, ordered payload from the reliability engine: either a
/// connected-mode control packet this task answers itself, or application
/// data handed upward through the codec.
async fn handle_delivery(
    session: &mut Session,
    ctx: &SessionContext,
    delivery_tx: &Option<mpsc::Sender<TransportEvent>>,
    established: &Arc<AtomicBool>,
    payload: Bytes,
) {
    let peer = session.peer();
    let mut slice = payload.clone();
    match RaknetPacket::decode(&mut slice) {
        Ok(RaknetPacket::ConnectedPing(ping)) => {
            session.queue_packet(
                &RaknetPacket::ConnectedPong(ConnectedPong {
                    ping_time: ping.ping_time,
                    pong_time: RaknetTime(now_millis()),
                }),
                Reliability::Unreliable,
                0,
            );
        }
        Ok(RaknetPacket::ConnectedPong(_)) => {
            // Keepalive; activity already refreshed on receive.
        }
        Ok(RaknetPacket::ConnectionRequest(request)) => {
            debug!(%peer, client_guid = request.client_guid, "connection request");
            let accepted =
                ConnectionRequestAccepted::for_peer(peer, request.timestamp, now_millis());
            session.queue_packet(
                &RaknetPacket::ConnectionRequestAccepted(accepted),
                Reliability::ReliableOrdered,
                0,
            );
        }
        Ok(RaknetPacket::NewIncomingConnection(_)) => {
            info!(%peer, "session connected");
            session.set_state(SessionState::Connected);
            established.store(true, Ordering::Release);
        }
        Ok(RaknetPacket::DisconnectNotification(_)) => {
            debug!(%peer, "peer sent disconnect notification");
            session.evict(DisconnectReason::ClosedByRemotePeer);
        }
        Ok(RaknetPacket::UserData { id, payload }) => {
            trace_packet(ctx, id, payload.len(), peer, "recv");
            match ctx.hooks.codec.decode(id, payload) {
                Some(message) => {
                    let event = TransportEvent::Message { peer, message };
                    match delivery_tx {
                        Some(tx) => {
                            let _ = tx.send(event).await;
                        }
                        None => {
                            let _ = ctx.event_tx.send(event).await;
                        }
                    }
                }
                None => {
                    // Unknown message ID inside a healthy session: drop
                    // and keep going.
                    debug!(%peer, id = format_args!("0x{id:02X}"), "unknown message id dropped");
                }
            }
        }
        Ok(other) => {
            trace!(%peer, id = format_args!("0x{:02X}", other.id()), "unexpected control packet");
        }
        Err(e) => {
            debug!(%peer, error = %e, "undecodable session payload dropped");
        }
    }
}

async fn transmit(ctx: &SessionContext, peer: SocketAddr, datagrams: Vec<Bytes>) {
    for bytes in datagrams {
        match ctx.socket.send_to(&bytes, peer).await {
            Ok(n) => {
                TransportMetrics::incr(&ctx.metrics.packets_sent);
                TransportMetrics::add(&ctx.metrics.bytes_sent, n as u64);
            }
            Err(e) => {
                // Swallowed: the RTO path retries reliable traffic.
                trace!(%peer, error = %e, "udp send failed");
            }
        }
    }
}

fn trace_packet(ctx: &SessionContext, id: u8, len: usize, peer: SocketAddr, direction: &str) {
    let filter = &ctx.config.trace_packets;
    if !filter.should_trace(id) {
        return;
    }
    if filter.verbosity >= 2 {
        trace!(%peer, id = format_args!("0x{id:02X}"), len, "{direction} packet");
    } else {
        trace!(%peer, id = format_args!("0x{id:02X}"), "{direction} packet");
    }
}

/// Wall-clock milliseconds for ping/pong timestamps; monotonic time is
/// used everywhere RTT or timeouts are computed.
fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
