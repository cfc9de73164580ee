use bytes::{Buf, BufMut};

use crate::protocol::packet::{DecodeError, Packet};
use crate::protocol::packet::{
    AlreadyConnected, ConnectedPing, ConnectedPong, ConnectionRequest, ConnectionRequestAccepted,
    DisconnectNotification, IncompatibleProtocolVersion, NewIncomingConnection,
    NoFreeIncomingConnections, OpenConnectionReply1, OpenConnectionReply2, OpenConnectionRequest1,
    OpenConnectionRequest2, UnconnectedPing, UnconnectedPong,
};

/// Generates the `RaknetPacket` enum covering every control packet plus the
/// opaque `UserData` escape hatch for application-layer IDs (≥ 0x80).
macro_rules! define_raknet_packets {
    ( $( $name:ident, )+ ) => {
        pub enum RaknetPacket {
            $( $name($name), )+
            UserData { id: u8, payload: bytes::Bytes },
        }

        impl RaknetPacket {
            pub fn decode(src: &mut impl Buf) -> Result<Self, DecodeError> {
                if !src.has_remaining() {
                    return Err(DecodeError::UnexpectedEof);
                }
                let id = src.get_u8();
                Ok(match id {
                    $(
                        <$name as Packet>::ID => {
                            RaknetPacket::$name(<$name as Packet>::decode_body(src)?)
                        }
                    )+
                    other if other >= 0x80 => {
                        let mut tmp = bytes::BytesMut::with_capacity(src.remaining());
                        tmp.put(src);
                        RaknetPacket::UserData { id: other, payload: tmp.freeze() }
                    }
                    other => return Err(DecodeError::UnknownId(other)),
                })
            }

            pub fn id(&self) -> u8 {
                match self {
                    $( RaknetPacket::$name(_) => <$name as Packet>::ID, )+
                    RaknetPacket::UserData { id, .. } => *id,
                }
            }

            pub fn encode(&self, dst: &mut impl BufMut) {
                dst.put_u8(self.id());
                match self {
                    $( RaknetPacket::$name(inner) => inner.encode_body(dst), )+
                    RaknetPacket::UserData { payload, .. } => dst.put_slice(payload),
                }
            }
        }
    }
}

define_raknet_packets! {
    ConnectedPing,
    UnconnectedPing,
    ConnectedPong,
    OpenConnectionRequest1,
    OpenConnectionReply1,
    OpenConnectionRequest2,
    OpenConnectionReply2,
    ConnectionRequest,
    ConnectionRequestAccepted,
    AlreadyConnected,
    NewIncomingConnection,
    NoFreeIncomingConnections,
    DisconnectNotification,
    IncompatibleProtocolVersion,
    UnconnectedPong,
}
