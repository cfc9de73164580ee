//! Reliable-datagram RakNet transport server for Minecraft Bedrock
//! clients.
//!
//! The crate accepts many concurrent UDP peers, maintains per-peer
//! reliability state (sequencing, acknowledgement, retransmission,
//! split-packet reassembly, ordered delivery) and hands complete, ordered
//! application messages to a pluggable upper layer:
//!
//! ```no_run
//! use bedrock_raknet::{Hooks, RaknetServer, ServerConfig, TransportEvent};
//!
//! # async fn demo() -> Result<(), bedrock_raknet::RaknetError> {
//! let (server, mut events, _handle) =
//!     RaknetServer::bind(ServerConfig::default(), Hooks::default()).await?;
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! tokio::spawn(server.run(shutdown_rx));
//!
//! while let Some(event) = events.recv().await {
//!     if let TransportEvent::Message { peer, message } = event {
//!         println!("{peer}: 0x{:02X} ({} bytes)", message.id, message.payload.len());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod hooks;
pub mod metrics;
pub mod protocol;
pub mod session;
pub mod transport;

mod error;

pub use config::ServerConfig;
pub use error::RaknetError;
pub use hooks::{
    AdmissionController, AppMessage, Hooks, MessageCodec, MotdProvider, QueryResponder, ServerInfo,
};
pub use metrics::TransportMetrics;
pub use protocol::reliability::Reliability;
pub use protocol::state::{DisconnectReason, SessionState};
pub use transport::{RaknetServer, ServerHandle, TransportEvent};
