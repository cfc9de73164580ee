use thiserror::Error;

/// Errors raised while decoding RakNet wire values or packet bodies.
///
/// Kept small and generic so it can be shared by all `RaknetEncodable`
/// implementations and packet bodies.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The buffer did not contain enough bytes for the requested value.
    #[error("unexpected EOF, not enough bytes to read requested type")]
    UnexpectedEof,

    /// A control packet ID not recognised by the registry.
    #[error("unknown packet id 0x{0:02X}")]
    UnknownId(u8),

    /// Datagram flags byte without the valid bit, or otherwise nonsensical.
    #[error("invalid datagram header byte 0x{0:02X}")]
    InvalidDatagramHeader(u8),

    /// A reliability code outside the defined range.
    #[error("unknown reliability code {0}")]
    UnknownReliability(u8),

    /// An ordering channel at or above the 32-channel limit.
    #[error("illegal ordering channel {0}")]
    IllegalOrderingChannel(u8),

    /// An address encoding with an unsupported version field.
    #[error("invalid address version {0}, expected 4 or 6")]
    InvalidAddrVersion(u8),

    /// A length-prefixed string that was not valid UTF-8.
    #[error("string payload was not valid UTF-8")]
    InvalidString,

    /// A disconnect reason byte that maps to no known variant.
    #[error("unknown disconnect reason byte {0}")]
    UnknownDisconnectReason(u8),
}
