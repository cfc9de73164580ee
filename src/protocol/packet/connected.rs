//! Connected-mode handshake and keepalive packets, carried inside
//! encapsulated messages once a session exists.

use std::net::SocketAddr;

use bytes::{Buf, BufMut};

use crate::protocol::{
    packet::{Packet, RaknetEncodable},
    types::RaknetTime,
};

const ANY_V4: SocketAddr = SocketAddr::V4(std::net::SocketAddrV4::new(
    std::net::Ipv4Addr::UNSPECIFIED,
    0,
));

pub struct ConnectedPing {
    pub ping_time: RaknetTime,
}

impl Packet for ConnectedPing {
    const ID: u8 = 0x00;

    fn encode_body(&self, dst: &mut impl BufMut) {
        self.ping_time.encode_raknet(dst);
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, super::DecodeError> {
        Ok(Self {
            ping_time: RaknetTime::decode_raknet(src)?,
        })
    }
}

pub struct ConnectedPong {
    pub ping_time: RaknetTime,
    pub pong_time: RaknetTime,
}

impl Packet for ConnectedPong {
    const ID: u8 = 0x03;

    fn encode_body(&self, dst: &mut impl BufMut) {
        self.ping_time.encode_raknet(dst);
        self.pong_time.encode_raknet(dst);
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, super::DecodeError> {
        Ok(Self {
            ping_time: RaknetTime::decode_raknet(src)?,
            pong_time: RaknetTime::decode_raknet(src)?,
        })
    }
}

pub struct ConnectionRequest {
    pub client_guid: i64,
    pub timestamp: RaknetTime,
    pub secure: bool,
}

impl Packet for ConnectionRequest {
    const ID: u8 = 0x09;

    fn encode_body(&self, dst: &mut impl BufMut) {
        self.client_guid.encode_raknet(dst);
        self.timestamp.encode_raknet(dst);
        self.secure.encode_raknet(dst);
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, super::DecodeError> {
        Ok(Self {
            client_guid: i64::decode_raknet(src)?,
            timestamp: RaknetTime::decode_raknet(src)?,
            secure: bool::decode_raknet(src)?,
        })
    }
}

pub struct ConnectionRequestAccepted {
    pub client_addr: SocketAddr,
    pub system_index: u16,
    pub system_addresses: [SocketAddr; 10],
    pub request_timestamp: RaknetTime,
    pub accepted_timestamp: RaknetTime,
}

impl Packet for ConnectionRequestAccepted {
    const ID: u8 = 0x10;

    fn encode_body(&self, dst: &mut impl BufMut) {
        self.client_addr.encode_raknet(dst);
        self.system_index.encode_raknet(dst);
        for addr in &self.system_addresses {
            addr.encode_raknet(dst);
        }
        self.request_timestamp.encode_raknet(dst);
        self.accepted_timestamp.encode_raknet(dst);
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, super::DecodeError> {
        let client_addr = SocketAddr::decode_raknet(src)?;
        let system_index = u16::decode_raknet(src)?;
        let mut system_addresses = [ANY_V4; 10];
        for addr in &mut system_addresses {
            *addr = SocketAddr::decode_raknet(src)?;
        }
        Ok(Self {
            client_addr,
            system_index,
            system_addresses,
            request_timestamp: RaknetTime::decode_raknet(src)?,
            accepted_timestamp: RaknetTime::decode_raknet(src)?,
        })
    }
}

impl ConnectionRequestAccepted {
    pub fn for_peer(peer: SocketAddr, request_timestamp: RaknetTime, now_ms: i64) -> Self {
        let mut system_addresses = [ANY_V4; 10];
        system_addresses[0] = peer;
        Self {
            client_addr: peer,
            system_index: 0,
            system_addresses,
            request_timestamp,
            accepted_timestamp: RaknetTime(now_ms),
        }
    }
}

pub struct NewIncomingConnection {
    pub server_addr: SocketAddr,
    pub system_addresses: [SocketAddr; 10],
    pub request_timestamp: RaknetTime,
    pub accepted_timestamp: RaknetTime,
}

impl Packet for NewIncomingConnection {
    const ID: u8 = 0x13;

    fn encode_body(&self, dst: &mut impl BufMut) {
        self.server_addr.encode_raknet(dst);
        for addr in &self.system_addresses {
            addr.encode_raknet(dst);
        }
        self.request_timestamp.encode_raknet(dst);
        self.accepted_timestamp.encode_raknet(dst);
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, super::DecodeError> {
        let server_addr = SocketAddr::decode_raknet(src)?;
        let mut system_addresses = [ANY_V4; 10];
        for addr in &mut system_addresses {
            *addr = SocketAddr::decode_raknet(src)?;
        }
        Ok(Self {
            server_addr,
            system_addresses,
            request_timestamp: RaknetTime::decode_raknet(src)?,
            accepted_timestamp: RaknetTime::decode_raknet(src)?,
        })
    }
}

pub struct DisconnectNotification;

impl Packet for DisconnectNotification {
    const ID: u8 = 0x15;

    fn encode_body(&self, _dst: &mut impl BufMut) {}

    fn decode_body(_src: &mut impl Buf) -> Result<Self, super::DecodeError> {
        Ok(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn connection_request_roundtrip() {
        let pkt = ConnectionRequest {
            client_guid: 99,
            timestamp: RaknetTime(1234),
            secure: false,
        };
        let mut buf = BytesMut::new();
        pkt.encode_body(&mut buf);
        let mut slice = buf.freeze();
        let decoded = ConnectionRequest::decode_body(&mut slice).unwrap();
        assert_eq!(decoded.client_guid, 99);
        assert_eq!(decoded.timestamp.0, 1234);
    }

    #[test]
    fn accepted_roundtrip() {
        let peer: SocketAddr = "127.0.0.1:51111".parse().unwrap();
        let pkt = ConnectionRequestAccepted::for_peer(peer, RaknetTime(7), 11);
        let mut buf = BytesMut::new();
        pkt.encode_body(&mut buf);
        let mut slice = buf.freeze();
        let decoded = ConnectionRequestAccepted::decode_body(&mut slice).unwrap();
        assert_eq!(decoded.client_addr, peer);
        assert_eq!(decoded.system_addresses[0], peer);
        assert_eq!(decoded.request_timestamp.0, 7);
        assert_eq!(decoded.accepted_timestamp.0, 11);
    }
}
