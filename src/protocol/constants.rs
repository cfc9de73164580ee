use bitflags::bitflags;
use std::time::Duration;

use crate::protocol::types::Magic;

/// RakNet protocol version spoken by current Bedrock clients.
pub const RAKNET_PROTOCOL_VERSION: u8 = 11;

pub const MINIMUM_MTU_SIZE: u16 = 576;
pub const MAXIMUM_MTU_SIZE: u16 = 1400;

/// Ordering channels per session; channel bytes ≥ this value are illegal.
pub const ORDERING_CHANNEL_COUNT: usize = 32;

/// Flags byte + 24-bit sequence number.
pub const DATAGRAM_HEADER_SIZE: usize = 4;

/// Worst-case encapsulated message header: flags, bit length, reliable
/// number, ordering index + channel, split triple.
pub const MAX_ENCAPSULATED_HEADER_SIZE: usize = 1 + 2 + 3 + 3 + 1 + 10;

/// Fragments above this count are treated as hostile and rejected.
pub const MAX_SPLIT_COUNT: u32 = 512;

/// A datagram is given up on after this many transmissions.
pub const MAX_TRANSMISSION_COUNT: u32 = 10;

/// Given-up datagrams tolerated before the session itself is disconnected.
pub const MAX_DATAGRAM_FAILURES: u32 = 64;

/// Cadence of the per-session tick that drains ACK/NAK queues and scans
/// retained datagrams for RTO expiry.
pub const SESSION_TICK_INTERVAL: Duration = Duration::from_millis(10);

/// Cadence of the table cleaner that removes evicted sessions.
pub const CLEANER_INTERVAL: Duration = Duration::from_secs(1);

/// Idempotency window for OpenConnectionRequest1 retries.
pub const PENDING_CONNECTION_WINDOW: Duration = Duration::from_secs(3);

/// Incomplete split buffers older than this are discarded.
pub const SPLIT_REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Receive-window width for duplicate suppression of datagram sequence
/// numbers, in sequence steps.
pub const RECEIVE_WINDOW_SIZE: u32 = 2048;

/// Depth of the queue between the receive loop and each session task.
pub const SESSION_QUEUE_DEPTH: usize = 128;

/// First byte of GameSpy query datagrams.
pub const QUERY_MAGIC: u8 = 0xFE;

/// Receive buffer for the UDP socket; comfortably above the MTU ceiling.
pub const RECV_BUFFER_SIZE: usize = 2048;

bitflags! {
    /// Leading flags byte of every online datagram.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct DatagramFlags: u8 {
        const VALID = 0b1000_0000;
        const ACK   = 0b0100_0000;
        const NAK   = 0b0010_0000;

        const PACKET_PAIR     = 0b0001_0000;
        const CONTINUOUS_SEND = 0b0000_1000;
        const NEEDS_B_AND_AS  = 0b0000_0100;
    }
}

/// Magic constant carried by every offline (unconnected) packet.
pub const OFFLINE_MESSAGE_MAGIC: Magic = [
    0x00, 0xFF, 0xFF, 0x00, 0xFE, 0xFE, 0xFE, 0xFE, 0xFD, 0xFD, 0xFD, 0xFD, 0x12, 0x34, 0x56, 0x78,
];

/// IDs of packets handled without an established session.
pub fn is_offline_packet_id(id: u8) -> bool {
    matches!(id, 0x01 | 0x02 | 0x05 | 0x07)
}
