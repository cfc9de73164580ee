use bytes::{Buf, BufMut, Bytes};

use crate::protocol::{
    constants::ORDERING_CHANNEL_COUNT,
    packet::{DecodeError, RaknetEncodable},
    reliability::Reliability,
    types::Sequence24,
};

const SPLIT_FLAG: u8 = 1 << 4;

/// Fragment metadata shared by all parts of one split message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitInfo {
    pub count: u32,
    pub id: u16,
    pub index: u32,
}

/// One application payload with its reliability and ordering metadata,
/// packed inside a data datagram.
#[derive(Debug, Clone)]
pub struct EncapsulatedMessage {
    pub reliability: Reliability,
    pub reliable_number: Option<Sequence24>,
    pub sequence_index: Option<Sequence24>,
    pub ordering_index: Option<Sequence24>,
    pub ordering_channel: Option<u8>,
    pub split: Option<SplitInfo>,
    pub payload: Bytes,
}

impl EncapsulatedMessage {
    /// Size of the encoded message including its header, used by the send
    /// pipeline to pack frames into MTU-sized datagrams.
    pub fn encoded_size(&self) -> usize {
        let mut size = 1 + 2 + self.payload.len();
        if self.reliability.is_reliable() {
            size += 3;
        }
        if self.reliability.is_sequenced() {
            size += 3;
        }
        if self.reliability.is_ordered() || self.reliability.is_sequenced() {
            size += 3 + 1;
        }
        if self.split.is_some() {
            size += 4 + 2 + 4;
        }
        size
    }
}

impl RaknetEncodable for EncapsulatedMessage {
    fn encode_raknet(&self, dst: &mut impl BufMut) {
        let mut flags = (self.reliability as u8) << 5;
        if self.split.is_some() {
            flags |= SPLIT_FLAG;
        }
        dst.put_u8(flags);
        dst.put_u16((self.payload.len() as u16) << 3);

        if self.reliability.is_reliable() {
            self.reliable_number
                .unwrap_or(Sequence24::ZERO)
                .encode_raknet(dst);
        }
        if self.reliability.is_sequenced() {
            self.sequence_index
                .unwrap_or(Sequence24::ZERO)
                .encode_raknet(dst);
        }
        if self.reliability.is_ordered() || self.reliability.is_sequenced() {
            self.ordering_index
                .unwrap_or(Sequence24::ZERO)
                .encode_raknet(dst);
            dst.put_u8(self.ordering_channel.unwrap_or(0));
        }
        if let Some(split) = &self.split {
            split.count.encode_raknet(dst);
            split.id.encode_raknet(dst);
            split.index.encode_raknet(dst);
        }
        dst.put_slice(&self.payload);
    }

    fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
        let flags = u8::decode_raknet(src)?;
        let reliability = Reliability::from_code((flags >> 5) & 0x07)?;
        let is_split = flags & SPLIT_FLAG != 0;

        let bit_length = u16::decode_raknet(src)? as usize;
        let payload_len = bit_length.div_ceil(8);

        let reliable_number = if reliability.is_reliable() {
            Some(Sequence24::decode_raknet(src)?)
        } else {
            None
        };
        let sequence_index = if reliability.is_sequenced() {
            Some(Sequence24::decode_raknet(src)?)
        } else {
            None
        };
        let (ordering_index, ordering_channel) =
            if reliability.is_ordered() || reliability.is_sequenced() {
                let index = Sequence24::decode_raknet(src)?;
                let channel = u8::decode_raknet(src)?;
                if channel as usize >= ORDERING_CHANNEL_COUNT {
                    return Err(DecodeError::IllegalOrderingChannel(channel));
                }
                (Some(index), Some(channel))
            } else {
                (None, None)
            };
        let split = if is_split {
            Some(SplitInfo {
                count: u32::decode_raknet(src)?,
                id: u16::decode_raknet(src)?,
                index: u32::decode_raknet(src)?,
            })
        } else {
            None
        };

        if src.remaining() < payload_len {
            return Err(DecodeError::UnexpectedEof);
        }
        let payload = src.copy_to_bytes(payload_len);

        Ok(EncapsulatedMessage {
            reliability,
            reliable_number,
            sequence_index,
            ordering_index,
            ordering_channel,
            split,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn unreliable_roundtrip() {
        let msg = EncapsulatedMessage {
            reliability: Reliability::Unreliable,
            reliable_number: None,
            sequence_index: None,
            ordering_index: None,
            ordering_channel: None,
            split: None,
            payload: Bytes::from_static(b"hello"),
        };
        let mut buf = BytesMut::new();
        msg.encode_raknet(&mut buf);
        assert_eq!(buf.len(), msg.encoded_size());
        let mut slice = buf.freeze();
        let decoded = EncapsulatedMessage::decode_raknet(&mut slice).unwrap();
        assert_eq!(decoded.reliability, Reliability::Unreliable);
        assert_eq!(decoded.payload, msg.payload);
    }

    #[test]
    fn reliable_ordered_roundtrip() {
        let msg = EncapsulatedMessage {
            reliability: Reliability::ReliableOrdered,
            reliable_number: Some(Sequence24::new(42)),
            sequence_index: None,
            ordering_index: Some(Sequence24::new(7)),
            ordering_channel: Some(3),
            split: None,
            payload: Bytes::from_static(b"world"),
        };
        let mut buf = BytesMut::new();
        msg.encode_raknet(&mut buf);
        assert_eq!(buf.len(), msg.encoded_size());
        let mut slice = buf.freeze();
        let decoded = EncapsulatedMessage::decode_raknet(&mut slice).unwrap();
        assert_eq!(decoded.reliable_number, Some(Sequence24::new(42)));
        assert_eq!(decoded.ordering_index, Some(Sequence24::new(7)));
        assert_eq!(decoded.ordering_channel, Some(3));
    }

    #[test]
    fn split_roundtrip() {
        let msg = EncapsulatedMessage {
            reliability: Reliability::Reliable,
            reliable_number: Some(Sequence24::new(100)),
            sequence_index: None,
            ordering_index: None,
            ordering_channel: None,
            split: Some(SplitInfo {
                count: 3,
                id: 7,
                index: 1,
            }),
            payload: Bytes::from_static(b"fragment"),
        };
        let mut buf = BytesMut::new();
        msg.encode_raknet(&mut buf);
        let mut slice = buf.freeze();
        let decoded = EncapsulatedMessage::decode_raknet(&mut slice).unwrap();
        assert_eq!(
            decoded.split,
            Some(SplitInfo {
                count: 3,
                id: 7,
                index: 1
            })
        );
    }

    #[test]
    fn rejects_channel_out_of_range() {
        let msg = EncapsulatedMessage {
            reliability: Reliability::ReliableOrdered,
            reliable_number: Some(Sequence24::ZERO),
            sequence_index: None,
            ordering_index: Some(Sequence24::ZERO),
            ordering_channel: Some(32),
            split: None,
            payload: Bytes::from_static(b"x"),
        };
        let mut buf = BytesMut::new();
        msg.encode_raknet(&mut buf);
        let mut slice = buf.freeze();
        assert!(matches!(
            EncapsulatedMessage::decode_raknet(&mut slice),
            Err(DecodeError::IllegalOrderingChannel(32))
        ));
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let msg = EncapsulatedMessage {
            reliability: Reliability::Unreliable,
            reliable_number: None,
            sequence_index: None,
            ordering_index: None,
            ordering_channel: None,
            split: None,
            payload: Bytes::from_static(b"hello"),
        };
        let mut buf = BytesMut::new();
        msg.encode_raknet(&mut buf);
        let mut truncated = buf.freeze().slice(..5);
        assert!(EncapsulatedMessage::decode_raknet(&mut truncated).is_err());
    }
}
