//! Unconnected (offline) discovery packets.

use bytes::{Buf, BufMut};

use crate::protocol::{
    packet::{Packet, RaknetEncodable},
    types::{Magic, MotdString, RaknetTime},
};

/// Ping used by clients to discover RakNet servers.
#[derive(Debug)]
pub struct UnconnectedPing {
    pub ping_time: RaknetTime,
    pub magic: Magic,
    pub client_guid: i64,
}

impl Packet for UnconnectedPing {
    const ID: u8 = 0x01;

    fn encode_body(&self, dst: &mut impl BufMut) {
        self.ping_time.encode_raknet(dst);
        self.magic.encode_raknet(dst);
        self.client_guid.encode_raknet(dst);
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, super::DecodeError> {
        Ok(Self {
            ping_time: RaknetTime::decode_raknet(src)?,
            magic: Magic::decode_raknet(src)?,
            client_guid: i64::decode_raknet(src)?,
        })
    }
}

/// Pong answering `UnconnectedPing` with the server GUID and MOTD.
#[derive(Debug)]
pub struct UnconnectedPong {
    pub ping_time: RaknetTime,
    pub server_guid: i64,
    pub magic: Magic,
    pub motd: MotdString,
}

impl Packet for UnconnectedPong {
    const ID: u8 = 0x1C;

    fn encode_body(&self, dst: &mut impl BufMut) {
        self.ping_time.encode_raknet(dst);
        self.server_guid.encode_raknet(dst);
        self.magic.encode_raknet(dst);
        self.motd.encode_raknet(dst);
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, super::DecodeError> {
        Ok(Self {
            ping_time: RaknetTime::decode_raknet(src)?,
            server_guid: i64::decode_raknet(src)?,
            magic: Magic::decode_raknet(src)?,
            motd: MotdString::decode_raknet(src)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::OFFLINE_MESSAGE_MAGIC;
    use bytes::BytesMut;

    #[test]
    fn unconnected_ping_roundtrip() {
        let pkt = UnconnectedPing {
            ping_time: RaknetTime(123),
            magic: OFFLINE_MESSAGE_MAGIC,
            client_guid: 42,
        };
        let mut buf = BytesMut::new();
        pkt.encode_body(&mut buf);
        let mut slice = buf.freeze();
        let decoded = UnconnectedPing::decode_body(&mut slice).unwrap();
        assert_eq!(decoded.ping_time.0, 123);
        assert_eq!(decoded.client_guid, 42);
        assert_eq!(decoded.magic, OFFLINE_MESSAGE_MAGIC);
    }

    #[test]
    fn unconnected_pong_roundtrip() {
        let pkt = UnconnectedPong {
            ping_time: RaknetTime(1),
            server_guid: 2,
            magic: OFFLINE_MESSAGE_MAGIC,
            motd: MotdString("MCPE;Test;0;0".into()),
        };
        let mut buf = BytesMut::new();
        pkt.encode_body(&mut buf);
        let mut slice = buf.freeze();
        let decoded = UnconnectedPong::decode_body(&mut slice).unwrap();
        assert_eq!(decoded.server_guid, 2);
        assert_eq!(decoded.motd.0, "MCPE;Test;0;0");
    }
}
