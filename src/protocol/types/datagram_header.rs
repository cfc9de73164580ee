use bytes::{Buf, BufMut};

use crate::protocol::{
    constants::DatagramFlags,
    packet::{DecodeError, RaknetEncodable},
    types::Sequence24,
};

/// Flags byte plus the 24-bit sequence number of a data datagram. ACK/NAK
/// datagrams reuse the flags byte but carry range lists instead of a
/// sequence number, so the sequence field is only on the wire when neither
/// the ACK nor the NAK bit is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramHeader {
    pub flags: DatagramFlags,
    pub sequence: Sequence24,
}

impl DatagramHeader {
    pub fn for_data(sequence: Sequence24) -> Self {
        DatagramHeader {
            flags: DatagramFlags::VALID | DatagramFlags::NEEDS_B_AND_AS,
            sequence,
        }
    }

    pub fn is_ack(&self) -> bool {
        self.flags.contains(DatagramFlags::ACK)
    }

    pub fn is_nak(&self) -> bool {
        self.flags.contains(DatagramFlags::NAK)
    }

    pub fn is_valid(&self) -> bool {
        self.flags.contains(DatagramFlags::VALID)
    }

    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.flags.bits());
        if !self.is_ack() && !self.is_nak() {
            self.sequence.encode_raknet(dst);
        }
    }

    pub fn decode(src: &mut impl Buf) -> Result<Self, DecodeError> {
        let raw = u8::decode_raknet(src)?;
        let flags = DatagramFlags::from_bits_truncate(raw);
        if !flags.contains(DatagramFlags::VALID) {
            return Err(DecodeError::InvalidDatagramHeader(raw));
        }
        let sequence = if flags.intersects(DatagramFlags::ACK | DatagramFlags::NAK) {
            Sequence24::ZERO
        } else {
            Sequence24::decode_raknet(src)?
        };
        Ok(DatagramHeader { flags, sequence })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn data_header_roundtrip() {
        let header = DatagramHeader::for_data(Sequence24::new(0x0A0B0C));
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), 4);
        let mut slice = buf.freeze();
        let decoded = DatagramHeader::decode(&mut slice).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn rejects_header_without_valid_bit() {
        let mut slice = bytes::Bytes::from_static(&[0x00, 0x01, 0x02, 0x03]);
        assert!(DatagramHeader::decode(&mut slice).is_err());
    }
}
