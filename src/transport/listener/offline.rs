//! Offline (sessionless) traffic: unconnected pings and the two-step
//! open-connection exchange that negotiates MTU and creates sessions.

use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Instant;

use bytes::BytesMut;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::hooks::ServerInfo;
use crate::metrics::TransportMetrics;
use crate::protocol::constants::{
    MAXIMUM_MTU_SIZE, MINIMUM_MTU_SIZE, OFFLINE_MESSAGE_MAGIC, PENDING_CONNECTION_WINDOW,
    RAKNET_PROTOCOL_VERSION,
};
use crate::protocol::packet::{
    IncompatibleProtocolVersion, NoFreeIncomingConnections, OpenConnectionReply1,
    OpenConnectionReply2, OpenConnectionRequest1, OpenConnectionRequest2, Packet, RaknetPacket,
    UnconnectedPing, UnconnectedPong,
};
use crate::protocol::state::DisconnectReason;
use crate::protocol::types::MotdString;
use crate::transport::listener::{online, RaknetServer};
use crate::transport::table::SessionInput;
use crate::transport::TransportEvent;

/// In-progress handshake bookkeeping, keyed by peer address. Entries
/// suppress duplicate OpenConnectionRequest1 replies for a short window
/// and expire via the cleaner.
pub(super) struct PendingConnection {
    pub first_seen: Instant,
    pub mtu: u16,
}

pub(super) type PendingTable = Mutex<FxHashMap<SocketAddr, PendingConnection>>;

pub(super) async fn handle_offline(
    server: &RaknetServer,
    bytes: &[u8],
    peer: SocketAddr,
    pending: &PendingTable,
) {
    if server.hooks.admission.is_blacklisted(peer.ip()) {
        return;
    }

    let id = bytes[0];
    let mut body = &bytes[1..];
    match id {
        UnconnectedPing::ID | 0x02 => {
            if let Ok(ping) = UnconnectedPing::decode_body(&mut body) {
                handle_ping(server, ping, peer).await;
            }
        }
        OpenConnectionRequest1::ID => {
            if let Ok(request) = OpenConnectionRequest1::decode_body(&mut body) {
                handle_request1(server, request, bytes.len(), peer, pending).await;
            }
        }
        OpenConnectionRequest2::ID => {
            if let Ok(request) = OpenConnectionRequest2::decode_body(&mut body) {
                handle_request2(server, request, peer, pending).await;
            }
        }
        _ => {}
    }
}

async fn handle_ping(server: &RaknetServer, ping: UnconnectedPing, peer: SocketAddr) {
    let info = ServerInfo::from_config(&server.config, &server.metrics, server.server_guid);

    let motd = server.hooks.motd.motd(&info, peer, false);
    send_packet(
        server,
        peer,
        &RaknetPacket::UnconnectedPong(UnconnectedPong {
            ping_time: ping.ping_time,
            server_guid: server.server_guid,
            magic: OFFLINE_MESSAGE_MAGIC,
            motd: MotdString(motd),
        }),
    )
    .await;

    if server.config.server.enable_edu {
        let edu_motd = server.hooks.motd.motd(&info, peer, true);
        send_packet(
            server,
            peer,
            &RaknetPacket::UnconnectedPong(UnconnectedPong {
                ping_time: ping.ping_time,
                server_guid: server.server_guid,
                magic: OFFLINE_MESSAGE_MAGIC,
                motd: MotdString(edu_motd),
            }),
        )
        .await;
    }
}

async fn handle_request1(
    server: &RaknetServer,
    request: OpenConnectionRequest1,
    datagram_len: usize,
    peer: SocketAddr,
    pending: &PendingTable,
) {
    if request.protocol_version != RAKNET_PROTOCOL_VERSION {
        debug!(%peer, version = request.protocol_version, "incompatible protocol version");
        send_packet(
            server,
            peer,
            &RaknetPacket::IncompatibleProtocolVersion(IncompatibleProtocolVersion {
                protocol_version: RAKNET_PROTOCOL_VERSION,
                magic: OFFLINE_MESSAGE_MAGIC,
                server_guid: server.server_guid,
            }),
        )
        .await;
        return;
    }

    let open_handshakes = pending.lock().unwrap_or_else(|e| e.into_inner()).len();
    if !server.hooks.admission.accept_connection(peer)
        || open_handshakes >= server.config.max_concurrent_connects() as usize
    {
        debug!(%peer, "connection request denied");
        TransportMetrics::incr(&server.metrics.denied_connection_requests);
        send_packet(
            server,
            peer,
            &RaknetPacket::NoFreeIncomingConnections(NoFreeIncomingConnections {
                magic: OFFLINE_MESSAGE_MAGIC,
                server_guid: server.server_guid,
            }),
        )
        .await;
        return;
    }

    // The client pads request 1 up to the MTU it wants to probe.
    let mtu = (datagram_len as u16).clamp(MINIMUM_MTU_SIZE, MAXIMUM_MTU_SIZE);

    {
        let mut table = pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = table.get(&peer) {
            if entry.first_seen.elapsed() < PENDING_CONNECTION_WINDOW {
                trace!(%peer, "duplicate open-connection request 1 suppressed");
                return;
            }
        }
        table.insert(
            peer,
            PendingConnection {
                first_seen: Instant::now(),
                mtu,
            },
        );
    }

    debug!(%peer, mtu, "open-connection request 1");
    send_packet(
        server,
        peer,
        &RaknetPacket::OpenConnectionReply1(OpenConnectionReply1 {
            magic: OFFLINE_MESSAGE_MAGIC,
            server_guid: server.server_guid,
            server_has_security: false,
            mtu,
        }),
    )
    .await;
}

async fn handle_request2(
    server: &RaknetServer,
    request: OpenConnectionRequest2,
    peer: SocketAddr,
    pending: &PendingTable,
) {
    let probed_mtu = pending
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .remove(&peer)
        .map(|p| p.mtu);

    if let Some(existing) = server.table.get(peer).await {
        if !existing.is_established() {
            trace!(%peer, "duplicate open-connection request 2 for connecting session");
            return;
        }
        // A later-state session for this peer is stale; replace it.
        debug!(%peer, "replacing established session on new handshake");
        let _ = existing
            .input
            .send(SessionInput::Disconnect {
                reason: DisconnectReason::AlreadyConnected,
                notify_peer: false,
            })
            .await;
        server.table.remove(peer).await;
    }

    let mtu = request
        .mtu
        .min(probed_mtu.unwrap_or(MAXIMUM_MTU_SIZE))
        .clamp(MINIMUM_MTU_SIZE, MAXIMUM_MTU_SIZE);

    let (handle, task) = online::session_pair(server.session_context(), peer, mtu, request.client_guid);
    if !server.table.insert_if_absent(peer, handle).await {
        // Lost a race with a concurrent handshake; the first one wins.
        return;
    }
    tokio::spawn(task);

    debug!(%peer, mtu, client_guid = request.client_guid, "session created");
    send_packet(
        server,
        peer,
        &RaknetPacket::OpenConnectionReply2(OpenConnectionReply2 {
            magic: OFFLINE_MESSAGE_MAGIC,
            server_guid: server.server_guid,
            client_addr: peer,
            mtu,
            encryption_enabled: false,
        }),
    )
    .await;

    let _ = server
        .event_tx
        .send(TransportEvent::Connected {
            peer,
            client_guid: request.client_guid,
        })
        .await;
}

async fn send_packet(server: &RaknetServer, peer: SocketAddr, packet: &RaknetPacket) {
    let mut buf = BytesMut::with_capacity(64);
    packet.encode(&mut buf);
    server.send_raw(&buf, peer).await;
}
