use bytes::{Buf, BufMut};

use crate::protocol::packet::{DecodeError, RaknetEncodable};

/// Lifecycle of a server-side session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created on OpenConnectionRequest2; connected-mode login pending.
    Connecting,
    /// Login completed; application traffic flows.
    Connected,
    /// Disconnect initiated; flushing the notification to the peer.
    Disconnecting,
    /// Dead. All further traffic is dropped until the cleaner removes it.
    Evicted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DisconnectReason {
    ClosedByRemotePeer = 0,
    ShuttingDown = 1,
    Disconnected = 2,
    TimedOut = 3,
    ConnectionRequestFailed = 4,
    AlreadyConnected = 5,
    NoFreeIncomingConnections = 6,
    IncompatibleProtocolVersion = 7,
    BadPacket = 8,
    ResendCapExceeded = 9,
    SplitReassemblyFailed = 10,
}

impl RaknetEncodable for DisconnectReason {
    fn encode_raknet(&self, dst: &mut impl BufMut) {
        dst.put_u8(*self as u8);
    }

    fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
        let v = u8::decode_raknet(src)?;
        Ok(match v {
            0 => Self::ClosedByRemotePeer,
            1 => Self::ShuttingDown,
            2 => Self::Disconnected,
            3 => Self::TimedOut,
            4 => Self::ConnectionRequestFailed,
            5 => Self::AlreadyConnected,
            6 => Self::NoFreeIncomingConnections,
            7 => Self::IncompatibleProtocolVersion,
            8 => Self::BadPacket,
            9 => Self::ResendCapExceeded,
            10 => Self::SplitReassemblyFailed,
            other => return Err(DecodeError::UnknownDisconnectReason(other)),
        })
    }
}
