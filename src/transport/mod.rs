//! Tokio-based UDP transport layer.
//!
//! [`RaknetServer`] owns the socket and the receive loop; each accepted
//! peer gets a session task driving the reliability engine in
//! [`crate::session`]. The upper layer consumes a [`TransportEvent`]
//! stream and talks back through a cloneable [`ServerHandle`].

use std::net::SocketAddr;
use std::sync::Arc;

pub mod datagram;
pub mod encapsulated_packet;
pub mod listener;
mod table;

pub use listener::RaknetServer;
pub use table::{SessionHandle, SessionInput, SessionTable};

use crate::error::RaknetError;
use crate::hooks::AppMessage;
use crate::protocol::reliability::Reliability;
use crate::protocol::state::DisconnectReason;

/// Upward interface: everything the application layer hears from the
/// transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// A session entered Connecting (open-connection handshake finished).
    Connected { peer: SocketAddr, client_guid: i64 },
    /// One complete, in-order application message.
    Message { peer: SocketAddr, message: AppMessage },
    /// The session was evicted.
    Disconnected {
        peer: SocketAddr,
        reason: DisconnectReason,
    },
}

/// Cloneable handle for sending into sessions from any task.
#[derive(Clone)]
pub struct ServerHandle {
    table: Arc<SessionTable>,
}

impl ServerHandle {
    pub(crate) fn new(table: Arc<SessionTable>) -> Self {
        ServerHandle { table }
    }

    /// Queues an application message onto a session with the requested
    /// reliability and ordering channel.
    pub async fn send(
        &self,
        peer: SocketAddr,
        message: AppMessage,
        reliability: Reliability,
        channel: u8,
    ) -> Result<(), RaknetError> {
        let handle = self
            .table
            .get(peer)
            .await
            .ok_or(RaknetError::ConnectionClosed)?;
        handle
            .input
            .send(SessionInput::Send {
                message,
                reliability,
                channel,
            })
            .await
            .map_err(|_| RaknetError::ConnectionClosed)
    }

    /// Disconnects a session, optionally notifying the peer first.
    pub async fn disconnect(
        &self,
        peer: SocketAddr,
        reason: DisconnectReason,
        notify_peer: bool,
    ) -> Result<(), RaknetError> {
        let handle = self
            .table
            .get(peer)
            .await
            .ok_or(RaknetError::ConnectionClosed)?;
        handle
            .input
            .send(SessionInput::Disconnect {
                reason,
                notify_peer,
            })
            .await
            .map_err(|_| RaknetError::ConnectionClosed)
    }
}
