//! End-to-end tests over loopback UDP: a real `RaknetServer` on an
//! OS-chosen port, driven by a raw client socket with hand-built
//! datagrams.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use bedrock_raknet::protocol::constants::OFFLINE_MESSAGE_MAGIC;
use bedrock_raknet::protocol::packet::RaknetEncodable;
use bedrock_raknet::protocol::types::Sequence24;
use bedrock_raknet::transport::datagram::{Datagram, DatagramPayload};
use bedrock_raknet::transport::encapsulated_packet::{EncapsulatedMessage, SplitInfo};
use bedrock_raknet::{
    AdmissionController, DisconnectReason, Hooks, RaknetServer, Reliability, ServerConfig,
    TransportEvent, TransportMetrics,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

struct TestServer {
    addr: SocketAddr,
    guid: i64,
    events: mpsc::Receiver<TransportEvent>,
    metrics: Arc<TransportMetrics>,
    _shutdown: watch::Sender<bool>,
}

async fn start_server(mut config: ServerConfig, hooks: Hooks) -> TestServer {
    config.server.ip = "127.0.0.1".to_string();
    config.server.port = 0;
    let (server, events, _handle) = RaknetServer::bind(config, hooks)
        .await
        .expect("bind server");
    let addr = server.local_addr();
    let guid = server.server_guid();
    let metrics = server.metrics();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(server.run(shutdown_rx));
    TestServer {
        addr,
        guid,
        events,
        metrics,
        _shutdown: shutdown_tx,
    }
}

async fn client_socket() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0".parse::<SocketAddr>().unwrap())
        .await
        .expect("bind client socket")
}

async fn recv_from(socket: &UdpSocket) -> Vec<u8> {
    let mut buf = vec![0u8; 2048];
    let (len, _) = timeout(RECV_TIMEOUT, socket.recv_from(&mut buf))
        .await
        .expect("timed out waiting for datagram")
        .expect("socket error");
    buf.truncate(len);
    buf
}

async fn next_event(server: &mut TestServer) -> TransportEvent {
    timeout(RECV_TIMEOUT, server.events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Runs the two-step open-connection exchange and asserts the replies.
async fn open_session(client: &UdpSocket, server: &TestServer, client_guid: i64) -> u16 {
    // OpenConnectionRequest1, padded to probe an MTU of 1400.
    let mut ocr1 = BytesMut::new();
    ocr1.put_u8(0x05);
    ocr1.put_slice(&OFFLINE_MESSAGE_MAGIC);
    ocr1.put_u8(11);
    ocr1.resize(1400, 0);
    client.send_to(&ocr1, server.addr).await.unwrap();

    let reply1 = recv_from(client).await;
    assert_eq!(reply1[0], 0x06, "expected OpenConnectionReply1");
    let mut body = &reply1[1..];
    body.advance(16); // magic
    assert_eq!(body.get_i64(), server.guid);
    assert_eq!(body.get_u8(), 0, "server_has_security");
    let mtu = body.get_u16();
    assert_eq!(mtu, 1400);

    // OpenConnectionRequest2.
    let mut ocr2 = BytesMut::new();
    ocr2.put_u8(0x07);
    ocr2.put_slice(&OFFLINE_MESSAGE_MAGIC);
    server.addr.encode_raknet(&mut ocr2);
    ocr2.put_u16(mtu);
    ocr2.put_i64(client_guid);
    client.send_to(&ocr2, server.addr).await.unwrap();

    let reply2 = recv_from(client).await;
    assert_eq!(reply2[0], 0x08, "expected OpenConnectionReply2");
    mtu
}

fn reliable_ordered_frame(
    reliable_number: u32,
    ordering_index: u32,
    payload: Bytes,
    split: Option<SplitInfo>,
) -> EncapsulatedMessage {
    EncapsulatedMessage {
        reliability: Reliability::ReliableOrdered,
        reliable_number: Some(Sequence24::new(reliable_number)),
        sequence_index: None,
        ordering_index: Some(Sequence24::new(ordering_index)),
        ordering_channel: Some(0),
        split,
        payload,
    }
}

fn frameset(sequence: u32, message: EncapsulatedMessage) -> Vec<u8> {
    let datagram = Datagram::data(Sequence24::new(sequence), vec![message]);
    let mut buf = BytesMut::new();
    datagram.encode(&mut buf);
    buf.to_vec()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unconnected_ping_yields_motd_pong() {
    let server = start_server(ServerConfig::default(), Hooks::default()).await;
    let client = client_socket().await;

    let mut ping = BytesMut::new();
    ping.put_u8(0x01);
    ping.put_i64(777);
    ping.put_slice(&OFFLINE_MESSAGE_MAGIC);
    ping.put_i64(1);
    client.send_to(&ping, server.addr).await.unwrap();

    let pong = recv_from(&client).await;
    assert_eq!(pong[0], 0x1C);
    let mut body = &pong[1..];
    assert_eq!(body.get_i64(), 777, "ping correlator echoed");
    assert_eq!(body.get_i64(), server.guid);
    body.advance(16); // magic
    let len = body.get_u16() as usize;
    let motd = std::str::from_utf8(&body[..len]).unwrap();
    assert!(
        motd.starts_with("MCPE;Dedicated Server;527;1.19.1;0;1000;"),
        "unexpected motd: {motd}"
    );
}

#[tokio::test]
async fn happy_handshake_creates_a_session() {
    let mut server = start_server(ServerConfig::default(), Hooks::default()).await;
    let client = client_socket().await;

    open_session(&client, &server, 42).await;

    match next_event(&mut server).await {
        TransportEvent::Connected { peer, client_guid } => {
            assert_eq!(peer, client.local_addr().unwrap());
            assert_eq!(client_guid, 42);
        }
        other => panic!("expected Connected event, got {other:?}"),
    }
}

#[tokio::test]
async fn ordered_delivery_under_datagram_reorder() {
    let mut server = start_server(ServerConfig::default(), Hooks::default()).await;
    let client = client_socket().await;
    open_session(&client, &server, 42).await;
    let _ = next_event(&mut server).await; // Connected

    // Three ReliableOrdered messages, ordering_index 0..2, sent in
    // datagram order 2, 0, 1.
    let payloads = [&b"\x86zero"[..], b"\x86one", b"\x86two"];
    let framesets: Vec<Vec<u8>> = (0..3)
        .map(|i| {
            frameset(
                i,
                reliable_ordered_frame(i, i, Bytes::copy_from_slice(payloads[i as usize]), None),
            )
        })
        .collect();

    for i in [2usize, 0, 1] {
        client.send_to(&framesets[i], server.addr).await.unwrap();
    }

    for expected in [&b"zero"[..], b"one", b"two"] {
        match next_event(&mut server).await {
            TransportEvent::Message { message, .. } => {
                assert_eq!(message.id, 0x86);
                assert_eq!(&message.payload[..], expected);
            }
            other => panic!("expected Message event, got {other:?}"),
        }
    }

    // All three datagrams get acknowledged.
    let mut acked = Vec::new();
    while acked.len() < 3 {
        let raw = recv_from(&client).await;
        let mut slice = &raw[..];
        let datagram = Datagram::decode(&mut slice).expect("decodable server datagram");
        if let DatagramPayload::Ack(ranges) = datagram.payload {
            for range in &ranges.ranges {
                range.for_each(|seq| acked.push(seq.value()));
            }
        }
    }
    acked.sort_unstable();
    acked.dedup();
    assert_eq!(acked, vec![0, 1, 2]);
}

#[tokio::test]
async fn split_message_reassembles_from_disordered_parts() {
    let mut server = start_server(ServerConfig::default(), Hooks::default()).await;
    let client = client_socket().await;
    open_session(&client, &server, 42).await;
    let _ = next_event(&mut server).await; // Connected

    let mut whole = vec![0x86u8];
    whole.extend((0..2999u32).map(|i| (i % 251) as u8));
    let parts: Vec<Bytes> = whole.chunks(1000).map(Bytes::copy_from_slice).collect();
    assert_eq!(parts.len(), 3);

    // Parts arrive in order 2, 0, 1; all share split_id 7 and ordering
    // index 0, each with its own reliable number and datagram sequence.
    for (seq, part_index) in [(0u32, 2u32), (1, 0), (2, 1)] {
        let frame = reliable_ordered_frame(
            seq,
            0,
            parts[part_index as usize].clone(),
            Some(SplitInfo {
                count: 3,
                id: 7,
                index: part_index,
            }),
        );
        client
            .send_to(&frameset(seq, frame), server.addr)
            .await
            .unwrap();
    }

    match next_event(&mut server).await {
        TransportEvent::Message { message, .. } => {
            assert_eq!(message.id, 0x86);
            assert_eq!(&message.payload[..], &whole[1..]);
        }
        other => panic!("expected reassembled Message event, got {other:?}"),
    }
}

struct DenyAll;

impl AdmissionController for DenyAll {
    fn is_blacklisted(&self, _ip: std::net::IpAddr) -> bool {
        false
    }
    fn is_whitelisted(&self, _ip: std::net::IpAddr) -> bool {
        false
    }
    fn is_greylisted(&self, _ip: std::net::IpAddr) -> bool {
        true
    }
    fn accept_connection(&self, _peer: SocketAddr) -> bool {
        false
    }
    fn blacklist(&self, _ip: std::net::IpAddr) {}
}

#[tokio::test]
async fn admission_denial_answers_no_free_incoming_connections() {
    let hooks = Hooks {
        admission: Arc::new(DenyAll),
        ..Hooks::default()
    };
    let mut server = start_server(ServerConfig::default(), hooks).await;
    let client = client_socket().await;

    let mut ocr1 = BytesMut::new();
    ocr1.put_u8(0x05);
    ocr1.put_slice(&OFFLINE_MESSAGE_MAGIC);
    ocr1.put_u8(11);
    ocr1.resize(1400, 0);
    client.send_to(&ocr1, server.addr).await.unwrap();

    let reply = recv_from(&client).await;
    assert_eq!(reply[0], 0x14, "expected NoFreeIncomingConnections");
    assert_eq!(
        TransportMetrics::get(&server.metrics.denied_connection_requests),
        1
    );

    // No session was created, so no Connected event shows up.
    let quiet = timeout(Duration::from_millis(300), server.events.recv()).await;
    assert!(quiet.is_err(), "no event expected after denial");
}

#[tokio::test]
async fn inactive_session_is_evicted() {
    let mut config = ServerConfig::default();
    config.server.inactivity_timeout_ms = 200;
    let mut server = start_server(config, Hooks::default()).await;
    let client = client_socket().await;

    open_session(&client, &server, 42).await;
    let _ = next_event(&mut server).await; // Connected

    match next_event(&mut server).await {
        TransportEvent::Disconnected { reason, .. } => {
            assert_eq!(reason, DisconnectReason::TimedOut);
        }
        other => panic!("expected Disconnected event, got {other:?}"),
    }

    // Further datagrams without a fresh handshake go nowhere.
    tokio::time::sleep(Duration::from_millis(1100)).await; // cleaner pass
    let frame = reliable_ordered_frame(0, 0, Bytes::from_static(b"\x86late"), None);
    client
        .send_to(&frameset(0, frame), server.addr)
        .await
        .unwrap();
    let quiet = timeout(Duration::from_millis(300), server.events.recv()).await;
    assert!(quiet.is_err(), "evicted session must drop traffic");
}
