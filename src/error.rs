use thiserror::Error;

use crate::config::ConfigError;
use crate::protocol::packet::DecodeError;

/// Top-level error type for server startup and the public send surface.
#[derive(Debug, Error)]
pub enum RaknetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The peer has no live session, or its session queue is gone.
    #[error("connection closed")]
    ConnectionClosed,
}
