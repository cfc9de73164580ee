use bytes::{Buf, BufMut};

use crate::protocol::{
    ack::AckNakRanges,
    constants::DatagramFlags,
    packet::{DecodeError, RaknetEncodable},
    types::{DatagramHeader, Sequence24},
};
use crate::transport::encapsulated_packet::EncapsulatedMessage;

/// One UDP payload: either a sequence-numbered batch of encapsulated
/// messages, or an ACK/NAK range list.
pub struct Datagram {
    pub header: DatagramHeader,
    pub payload: DatagramPayload,
}

pub enum DatagramPayload {
    Messages(Vec<EncapsulatedMessage>),
    Ack(AckNakRanges),
    Nak(AckNakRanges),
}

impl Datagram {
    pub fn data(sequence: Sequence24, messages: Vec<EncapsulatedMessage>) -> Self {
        Datagram {
            header: DatagramHeader::for_data(sequence),
            payload: DatagramPayload::Messages(messages),
        }
    }

    pub fn ack(ranges: AckNakRanges) -> Self {
        Datagram {
            header: DatagramHeader {
                flags: DatagramFlags::VALID | DatagramFlags::ACK,
                sequence: Sequence24::ZERO,
            },
            payload: DatagramPayload::Ack(ranges),
        }
    }

    pub fn nak(ranges: AckNakRanges) -> Self {
        Datagram {
            header: DatagramHeader {
                flags: DatagramFlags::VALID | DatagramFlags::NAK,
                sequence: Sequence24::ZERO,
            },
            payload: DatagramPayload::Nak(ranges),
        }
    }

    pub fn encode(&self, dst: &mut impl BufMut) {
        self.header.encode(dst);
        match &self.payload {
            DatagramPayload::Messages(messages) => {
                for msg in messages {
                    msg.encode_raknet(dst);
                }
            }
            DatagramPayload::Ack(ranges) | DatagramPayload::Nak(ranges) => ranges.encode(dst),
        }
    }

    pub fn decode(src: &mut impl Buf) -> Result<Self, DecodeError> {
        let header = DatagramHeader::decode(src)?;
        let payload = if header.is_ack() {
            DatagramPayload::Ack(AckNakRanges::decode(src)?)
        } else if header.is_nak() {
            DatagramPayload::Nak(AckNakRanges::decode(src)?)
        } else {
            let mut messages = Vec::new();
            while src.has_remaining() {
                messages.push(EncapsulatedMessage::decode_raknet(src)?);
            }
            DatagramPayload::Messages(messages)
        };
        Ok(Datagram { header, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::reliability::Reliability;
    use bytes::{Bytes, BytesMut};

    fn data_datagram_bytes() -> Bytes {
        let msg = EncapsulatedMessage {
            reliability: Reliability::ReliableOrdered,
            reliable_number: Some(Sequence24::new(9)),
            sequence_index: None,
            ordering_index: Some(Sequence24::new(4)),
            ordering_channel: Some(0),
            split: None,
            payload: Bytes::from_static(b"payload"),
        };
        let datagram = Datagram::data(Sequence24::new(17), vec![msg]);
        let mut buf = BytesMut::new();
        datagram.encode(&mut buf);
        buf.freeze()
    }

    #[test]
    fn encode_decode_encode_is_identity() {
        let bytes = data_datagram_bytes();
        let mut slice = bytes.clone();
        let decoded = Datagram::decode(&mut slice).unwrap();
        let mut reencoded = BytesMut::new();
        decoded.encode(&mut reencoded);
        assert_eq!(reencoded.freeze(), bytes);
    }

    #[test]
    fn ack_datagram_roundtrip() {
        let ranges = AckNakRanges::from_sequences(vec![
            Sequence24::new(3),
            Sequence24::new(4),
            Sequence24::new(9),
        ]);
        let datagram = Datagram::ack(ranges.clone());
        let mut buf = BytesMut::new();
        datagram.encode(&mut buf);
        let mut slice = buf.freeze();
        let decoded = Datagram::decode(&mut slice).unwrap();
        assert!(decoded.header.is_ack());
        match decoded.payload {
            DatagramPayload::Ack(got) => assert_eq!(got, ranges),
            _ => panic!("expected ACK payload"),
        }
    }

    #[test]
    fn truncated_datagram_is_an_error() {
        let bytes = data_datagram_bytes();
        let mut slice = bytes.slice(..bytes.len() - 3);
        assert!(Datagram::decode(&mut slice).is_err());
    }
}
