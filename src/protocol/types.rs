//! Wire-level value types and `RaknetEncodable` impls for primitives.

mod datagram_header;
mod sequence;

pub use datagram_header::DatagramHeader;
pub use sequence::Sequence24;

use bytes::{Buf, BufMut};
use std::{
    mem,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6},
    time::Duration,
};

use crate::protocol::packet::{DecodeError, RaknetEncodable};

pub type Magic = [u8; 16];

macro_rules! impl_raknet_int {
    ($ty:ty, $put:ident, $get:ident) => {
        impl RaknetEncodable for $ty {
            fn encode_raknet(&self, dst: &mut impl BufMut) {
                dst.$put(*self as _);
            }

            fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
                if src.remaining() < mem::size_of::<$ty>() {
                    return Err(DecodeError::UnexpectedEof);
                }
                Ok(src.$get() as $ty)
            }
        }
    };
}

// Wire integers are big-endian except for the 24-bit sequence fields.
impl_raknet_int!(u16, put_u16, get_u16);
impl_raknet_int!(u32, put_u32, get_u32);
impl_raknet_int!(u64, put_u64, get_u64);
impl_raknet_int!(i64, put_i64, get_i64);

impl RaknetEncodable for u8 {
    fn encode_raknet(&self, dst: &mut impl BufMut) {
        dst.put_u8(*self);
    }

    fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
        if !src.has_remaining() {
            return Err(DecodeError::UnexpectedEof);
        }
        Ok(src.get_u8())
    }
}

impl RaknetEncodable for bool {
    fn encode_raknet(&self, dst: &mut impl BufMut) {
        dst.put_u8(*self as u8);
    }

    fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
        Ok(u8::decode_raknet(src)? != 0)
    }
}

impl RaknetEncodable for Magic {
    fn encode_raknet(&self, dst: &mut impl BufMut) {
        dst.put_slice(self);
    }

    fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
        if src.remaining() < mem::size_of::<Self>() {
            return Err(DecodeError::UnexpectedEof);
        }
        let mut magic = [0u8; 16];
        src.copy_to_slice(&mut magic);
        Ok(magic)
    }
}

/// 24-bit little-endian integer, the raw wire form of [`Sequence24`].
pub struct U24LE(pub u32);

impl RaknetEncodable for U24LE {
    fn encode_raknet(&self, dst: &mut impl BufMut) {
        let v = self.0;
        dst.put_u8((v & 0xFF) as u8);
        dst.put_u8(((v >> 8) & 0xFF) as u8);
        dst.put_u8(((v >> 16) & 0xFF) as u8);
    }

    fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
        if src.remaining() < 3 {
            return Err(DecodeError::UnexpectedEof);
        }
        let b0 = src.get_u8() as u32;
        let b1 = src.get_u8() as u32;
        let b2 = src.get_u8() as u32;
        Ok(U24LE(b0 | (b1 << 8) | (b2 << 16)))
    }
}

/// Millisecond timestamp as carried by ping/pong packets.
#[derive(Debug, Clone, Copy)]
pub struct RaknetTime(pub i64);

impl RaknetEncodable for RaknetTime {
    fn encode_raknet(&self, dst: &mut impl BufMut) {
        self.0.encode_raknet(dst);
    }

    fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
        Ok(Self(i64::decode_raknet(src)?))
    }
}

impl From<RaknetTime> for Duration {
    fn from(value: RaknetTime) -> Self {
        Duration::from_millis(value.0.max(0) as u64)
    }
}

/// u16-length-prefixed UTF-8 string, used for the pong MOTD payload.
#[derive(Debug, Clone)]
pub struct MotdString(pub String);

impl RaknetEncodable for MotdString {
    fn encode_raknet(&self, dst: &mut impl BufMut) {
        let bytes = self.0.as_bytes();
        let len = bytes.len().min(u16::MAX as usize);
        dst.put_u16(len as u16);
        dst.put_slice(&bytes[..len]);
    }

    fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
        let len = u16::decode_raknet(src)? as usize;
        if src.remaining() < len {
            return Err(DecodeError::UnexpectedEof);
        }
        let raw = src.copy_to_bytes(len);
        let s = String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::InvalidString)?;
        Ok(MotdString(s))
    }
}

/// Zero padding running to the end of the datagram. OpenConnectionRequest1
/// uses it to probe the path MTU; the decoded length is the padding size.
pub struct EobPadding(pub usize);

impl RaknetEncodable for EobPadding {
    fn encode_raknet(&self, dst: &mut impl BufMut) {
        dst.put_bytes(0, self.0);
    }

    fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
        let len = src.remaining();
        src.advance(len);
        Ok(EobPadding(len))
    }
}

impl RaknetEncodable for SocketAddr {
    fn encode_raknet(&self, dst: &mut impl BufMut) {
        match self {
            SocketAddr::V4(addr) => {
                dst.put_u8(4);
                // IPv4 octets go out complemented, per the original RakNet.
                for b in addr.ip().octets() {
                    dst.put_u8(!b);
                }
                dst.put_u16(addr.port());
            }
            SocketAddr::V6(addr) => {
                dst.put_u8(6);
                dst.put_u16_le(23); // AF_INET6 as serialized by the reference stack
                dst.put_u16(addr.port());
                dst.put_u32(addr.flowinfo());
                dst.put_slice(&addr.ip().octets());
                dst.put_u32(addr.scope_id());
            }
        }
    }

    fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
        let version = u8::decode_raknet(src)?;
        match version {
            4 => {
                if src.remaining() < 4 + 2 {
                    return Err(DecodeError::UnexpectedEof);
                }
                let mut octets = [0u8; 4];
                src.copy_to_slice(&mut octets);
                for b in &mut octets {
                    *b = !*b;
                }
                let port = src.get_u16();
                Ok(SocketAddr::V4(SocketAddrV4::new(
                    Ipv4Addr::from(octets),
                    port,
                )))
            }
            6 => {
                if src.remaining() < 2 + 2 + 4 + 16 + 4 {
                    return Err(DecodeError::UnexpectedEof);
                }
                let _family = src.get_u16_le();
                let port = src.get_u16();
                let flowinfo = src.get_u32();
                let mut octets = [0u8; 16];
                src.copy_to_slice(&mut octets);
                let scope_id = src.get_u32();
                Ok(SocketAddr::V6(SocketAddrV6::new(
                    Ipv6Addr::from(octets),
                    port,
                    flowinfo,
                    scope_id,
                )))
            }
            other => Err(DecodeError::InvalidAddrVersion(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn u24_roundtrip() {
        for v in [0u32, 1, 0x1234, 0xFF_FFFF] {
            let mut buf = BytesMut::new();
            U24LE(v).encode_raknet(&mut buf);
            assert_eq!(buf.len(), 3);
            let mut slice = buf.freeze();
            assert_eq!(U24LE::decode_raknet(&mut slice).unwrap().0, v);
        }
    }

    #[test]
    fn socket_addr_v4_roundtrip() {
        let addr: SocketAddr = "192.168.1.7:19132".parse().unwrap();
        let mut buf = BytesMut::new();
        addr.encode_raknet(&mut buf);
        let mut slice = buf.freeze();
        assert_eq!(SocketAddr::decode_raknet(&mut slice).unwrap(), addr);
    }

    #[test]
    fn motd_string_roundtrip() {
        let motd = MotdString("MCPE;Server;0;0".to_string());
        let mut buf = BytesMut::new();
        motd.encode_raknet(&mut buf);
        let mut slice = buf.freeze();
        assert_eq!(MotdString::decode_raknet(&mut slice).unwrap().0, motd.0);
    }

    #[test]
    fn magic_roundtrip() {
        let value: Magic = crate::protocol::constants::OFFLINE_MESSAGE_MAGIC;
        let mut buf = BytesMut::new();
        value.encode_raknet(&mut buf);
        let mut slice = buf.freeze();
        assert_eq!(Magic::decode_raknet(&mut slice).unwrap(), value);
    }
}
