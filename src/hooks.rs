//! Downward interfaces the transport consumes. The game layer installs its
//! own implementations at bind time; the defaults here keep a bare server
//! functional for testing and standalone use.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use bytes::{BufMut, Bytes, BytesMut};
use rustc_hash::FxHashSet;

/// Snapshot of server identity handed to the MOTD provider.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub server_name: String,
    pub world_name: String,
    pub game_version: String,
    pub protocol_version: u32,
    pub gamemode: String,
    pub online_players: u64,
    pub max_players: u32,
    pub server_guid: i64,
    pub port: u16,
}

/// Produces the advertisement string for unconnected pongs.
pub trait MotdProvider: Send + Sync {
    fn motd(&self, info: &ServerInfo, peer: SocketAddr, edu: bool) -> String;
}

/// Semicolon-delimited MCPE advertisement, the format every Bedrock client
/// expects. The EDU flavor swaps the leading product token.
pub struct StaticMotd;

impl MotdProvider for StaticMotd {
    fn motd(&self, info: &ServerInfo, _peer: SocketAddr, edu: bool) -> String {
        format!(
            "{};{};{};{};{};{};{};{};{};1;{};{};",
            if edu { "MCEE" } else { "MCPE" },
            info.server_name,
            info.protocol_version,
            info.game_version,
            info.online_players,
            info.max_players,
            info.server_guid,
            info.world_name,
            info.gamemode,
            info.port,
            info.port,
        )
    }
}

/// Greylist/blacklist admission policy, consulted during the offline
/// handshake and when a peer misbehaves.
pub trait AdmissionController: Send + Sync {
    fn is_blacklisted(&self, ip: IpAddr) -> bool;
    fn is_whitelisted(&self, ip: IpAddr) -> bool;
    fn is_greylisted(&self, ip: IpAddr) -> bool;
    /// Gate for OpenConnectionRequest1; a `false` answers
    /// `NoFreeIncomingConnections`.
    fn accept_connection(&self, peer: SocketAddr) -> bool;
    /// Called when a peer sends malformed datagrams.
    fn blacklist(&self, ip: IpAddr);
}

/// Accepts everyone except peers blacklisted at runtime.
#[derive(Default)]
pub struct OpenAdmission {
    denied: Mutex<FxHashSet<IpAddr>>,
}

impl AdmissionController for OpenAdmission {
    fn is_blacklisted(&self, ip: IpAddr) -> bool {
        self.denied.lock().unwrap_or_else(|e| e.into_inner()).contains(&ip)
    }

    fn is_whitelisted(&self, _ip: IpAddr) -> bool {
        false
    }

    fn is_greylisted(&self, _ip: IpAddr) -> bool {
        false
    }

    fn accept_connection(&self, peer: SocketAddr) -> bool {
        !self.is_blacklisted(peer.ip())
    }

    fn blacklist(&self, ip: IpAddr) {
        self.denied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(ip);
    }
}

/// A decoded application message as seen by the upper layer. The transport
/// never looks inside the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppMessage {
    pub id: u8,
    pub payload: Bytes,
}

/// Factory seam for application packet codecs.
pub trait MessageCodec: Send + Sync {
    /// `None` means the ID is unknown; the message is dropped and logged,
    /// the session kept.
    fn decode(&self, id: u8, payload: Bytes) -> Option<AppMessage>;
    /// Produces the full wire payload including the leading ID byte.
    fn encode(&self, message: &AppMessage) -> Bytes;
}

/// Hands payloads through untouched.
pub struct PassthroughCodec;

impl MessageCodec for PassthroughCodec {
    fn decode(&self, id: u8, payload: Bytes) -> Option<AppMessage> {
        Some(AppMessage { id, payload })
    }

    fn encode(&self, message: &AppMessage) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + message.payload.len());
        buf.put_u8(message.id);
        buf.put_slice(&message.payload);
        buf.freeze()
    }
}

/// External GameSpy query responder, invoked for `0xFE` datagrams when the
/// query listener is enabled.
pub trait QueryResponder: Send + Sync {
    fn respond(&self, peer: SocketAddr, payload: &[u8]) -> Option<Bytes>;
}

/// Ignores all queries.
pub struct NoQuery;

impl QueryResponder for NoQuery {
    fn respond(&self, _peer: SocketAddr, _payload: &[u8]) -> Option<Bytes> {
        None
    }
}

/// The full set of collaborators a server is bound with.
#[derive(Clone)]
pub struct Hooks {
    pub motd: Arc<dyn MotdProvider>,
    pub admission: Arc<dyn AdmissionController>,
    pub codec: Arc<dyn MessageCodec>,
    pub query: Arc<dyn QueryResponder>,
}

impl Default for Hooks {
    fn default() -> Self {
        Hooks {
            motd: Arc::new(StaticMotd),
            admission: Arc::new(OpenAdmission::default()),
            codec: Arc::new(PassthroughCodec),
            query: Arc::new(NoQuery),
        }
    }
}

impl ServerInfo {
    pub fn from_config(
        config: &crate::config::ServerConfig,
        metrics: &crate::metrics::TransportMetrics,
        server_guid: i64,
    ) -> Self {
        ServerInfo {
            server_name: config.motd.server_name.clone(),
            world_name: config.motd.world_name.clone(),
            game_version: config.motd.game_version.clone(),
            protocol_version: config.motd.protocol_version,
            gamemode: config.motd.gamemode.clone(),
            online_players: metrics.session_count.load(Ordering::Relaxed),
            max_players: config.server.max_players,
            server_guid,
            port: config.server.port,
        }
    }
}
