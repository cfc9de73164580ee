pub mod connected;
pub mod open_connection;
pub mod unconnected;
mod error;
mod registry;

pub use connected::*;
pub use error::DecodeError;
pub use open_connection::*;
pub use registry::RaknetPacket;
pub use unconnected::*;

use bytes::{Buf, BufMut};

/// Trait implemented by all concrete RakNet packet body types.
///
/// Implementations encode/decode only the packet body; the leading ID byte
/// is handled by `RaknetPacket`.
pub trait Packet: Sized {
    /// The fixed ID byte identifying this packet on the wire.
    const ID: u8;

    fn encode_body(&self, dst: &mut impl BufMut);

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError>;
}

/// Trait for values that encode/decode themselves in the RakNet wire format.
pub trait RaknetEncodable: Sized {
    fn encode_raknet(&self, dst: &mut impl BufMut);

    fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError>;
}
