//! The two-step open-connection exchange that negotiates MTU and session
//! identity, plus the offline rejection replies.

use std::net::SocketAddr;

use bytes::{Buf, BufMut};

use crate::protocol::{
    packet::{Packet, RaknetEncodable},
    types::{EobPadding, Magic},
};

pub struct OpenConnectionRequest1 {
    pub magic: Magic,
    pub protocol_version: u8,
    /// MTU probe padding; the requested MTU is recovered from the total
    /// datagram length by the handshake handler.
    pub padding: EobPadding,
}

impl Packet for OpenConnectionRequest1 {
    const ID: u8 = 0x05;

    fn encode_body(&self, dst: &mut impl BufMut) {
        self.magic.encode_raknet(dst);
        self.protocol_version.encode_raknet(dst);
        self.padding.encode_raknet(dst);
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, super::DecodeError> {
        Ok(Self {
            magic: Magic::decode_raknet(src)?,
            protocol_version: u8::decode_raknet(src)?,
            padding: EobPadding::decode_raknet(src)?,
        })
    }
}

pub struct OpenConnectionReply1 {
    pub magic: Magic,
    pub server_guid: i64,
    pub server_has_security: bool,
    pub mtu: u16,
}

impl Packet for OpenConnectionReply1 {
    const ID: u8 = 0x06;

    fn encode_body(&self, dst: &mut impl BufMut) {
        self.magic.encode_raknet(dst);
        self.server_guid.encode_raknet(dst);
        self.server_has_security.encode_raknet(dst);
        self.mtu.encode_raknet(dst);
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, super::DecodeError> {
        Ok(Self {
            magic: Magic::decode_raknet(src)?,
            server_guid: i64::decode_raknet(src)?,
            server_has_security: bool::decode_raknet(src)?,
            mtu: u16::decode_raknet(src)?,
        })
    }
}

pub struct OpenConnectionRequest2 {
    pub magic: Magic,
    pub server_addr: SocketAddr,
    pub mtu: u16,
    pub client_guid: i64,
}

impl Packet for OpenConnectionRequest2 {
    const ID: u8 = 0x07;

    fn encode_body(&self, dst: &mut impl BufMut) {
        self.magic.encode_raknet(dst);
        self.server_addr.encode_raknet(dst);
        self.mtu.encode_raknet(dst);
        self.client_guid.encode_raknet(dst);
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, super::DecodeError> {
        Ok(Self {
            magic: Magic::decode_raknet(src)?,
            server_addr: SocketAddr::decode_raknet(src)?,
            mtu: u16::decode_raknet(src)?,
            client_guid: i64::decode_raknet(src)?,
        })
    }
}

pub struct OpenConnectionReply2 {
    pub magic: Magic,
    pub server_guid: i64,
    pub client_addr: SocketAddr,
    pub mtu: u16,
    pub encryption_enabled: bool,
}

impl Packet for OpenConnectionReply2 {
    const ID: u8 = 0x08;

    fn encode_body(&self, dst: &mut impl BufMut) {
        self.magic.encode_raknet(dst);
        self.server_guid.encode_raknet(dst);
        self.client_addr.encode_raknet(dst);
        self.mtu.encode_raknet(dst);
        self.encryption_enabled.encode_raknet(dst);
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, super::DecodeError> {
        Ok(Self {
            magic: Magic::decode_raknet(src)?,
            server_guid: i64::decode_raknet(src)?,
            client_addr: SocketAddr::decode_raknet(src)?,
            mtu: u16::decode_raknet(src)?,
            encryption_enabled: bool::decode_raknet(src)?,
        })
    }
}

/// Admission rejection sent in place of `OpenConnectionReply1`.
pub struct NoFreeIncomingConnections {
    pub magic: Magic,
    pub server_guid: i64,
}

impl Packet for NoFreeIncomingConnections {
    const ID: u8 = 0x14;

    fn encode_body(&self, dst: &mut impl BufMut) {
        self.magic.encode_raknet(dst);
        self.server_guid.encode_raknet(dst);
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, super::DecodeError> {
        Ok(Self {
            magic: Magic::decode_raknet(src)?,
            server_guid: i64::decode_raknet(src)?,
        })
    }
}

pub struct AlreadyConnected {
    pub magic: Magic,
    pub server_guid: i64,
}

impl Packet for AlreadyConnected {
    const ID: u8 = 0x12;

    fn encode_body(&self, dst: &mut impl BufMut) {
        self.magic.encode_raknet(dst);
        self.server_guid.encode_raknet(dst);
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, super::DecodeError> {
        Ok(Self {
            magic: Magic::decode_raknet(src)?,
            server_guid: i64::decode_raknet(src)?,
        })
    }
}

pub struct IncompatibleProtocolVersion {
    pub protocol_version: u8,
    pub magic: Magic,
    pub server_guid: i64,
}

impl Packet for IncompatibleProtocolVersion {
    const ID: u8 = 0x19;

    fn encode_body(&self, dst: &mut impl BufMut) {
        self.protocol_version.encode_raknet(dst);
        self.magic.encode_raknet(dst);
        self.server_guid.encode_raknet(dst);
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, super::DecodeError> {
        Ok(Self {
            protocol_version: u8::decode_raknet(src)?,
            magic: Magic::decode_raknet(src)?,
            server_guid: i64::decode_raknet(src)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::OFFLINE_MESSAGE_MAGIC;
    use bytes::BytesMut;

    #[test]
    fn request1_padding_probe() {
        let pkt = OpenConnectionRequest1 {
            magic: OFFLINE_MESSAGE_MAGIC,
            protocol_version: 11,
            padding: EobPadding(1000),
        };
        let mut buf = BytesMut::new();
        pkt.encode_body(&mut buf);
        assert_eq!(buf.len(), 16 + 1 + 1000);
        let mut slice = buf.freeze();
        let decoded = OpenConnectionRequest1::decode_body(&mut slice).unwrap();
        assert_eq!(decoded.protocol_version, 11);
        assert_eq!(decoded.padding.0, 1000);
    }

    #[test]
    fn request2_roundtrip() {
        let pkt = OpenConnectionRequest2 {
            magic: OFFLINE_MESSAGE_MAGIC,
            server_addr: "10.0.0.1:19132".parse().unwrap(),
            mtu: 1400,
            client_guid: 42,
        };
        let mut buf = BytesMut::new();
        pkt.encode_body(&mut buf);
        let mut slice = buf.freeze();
        let decoded = OpenConnectionRequest2::decode_body(&mut slice).unwrap();
        assert_eq!(decoded.mtu, 1400);
        assert_eq!(decoded.client_guid, 42);
        assert_eq!(decoded.server_addr, pkt.server_addr);
    }

    #[test]
    fn reply2_roundtrip() {
        let pkt = OpenConnectionReply2 {
            magic: OFFLINE_MESSAGE_MAGIC,
            server_guid: 12345,
            client_addr: "127.0.0.1:54321".parse().unwrap(),
            mtu: 1200,
            encryption_enabled: false,
        };
        let mut buf = BytesMut::new();
        pkt.encode_body(&mut buf);
        let mut slice = buf.freeze();
        let decoded = OpenConnectionReply2::decode_body(&mut slice).unwrap();
        assert_eq!(decoded.server_guid, 12345);
        assert_eq!(decoded.mtu, 1200);
        assert!(!decoded.encryption_enabled);
    }
}
