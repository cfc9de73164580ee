//! ACK/NAK range lists: the body of acknowledgement datagrams.

use bytes::{Buf, BufMut};

use crate::protocol::packet::{DecodeError, RaknetEncodable};
use crate::protocol::types::Sequence24;

/// Inclusive range of datagram sequence numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceRange {
    pub start: Sequence24,
    pub end: Sequence24,
}

impl SequenceRange {
    pub fn single(seq: Sequence24) -> Self {
        SequenceRange {
            start: seq,
            end: seq,
        }
    }

    /// Visits every sequence number in the range, wrap-aware.
    pub fn for_each(&self, mut f: impl FnMut(Sequence24)) {
        let mut seq = self.start;
        loop {
            f(seq);
            if seq == self.end {
                break;
            }
            seq = seq.next();
        }
    }
}

/// The decoded body of an ACK or NAK datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckNakRanges {
    pub ranges: Vec<SequenceRange>,
}

const RECORD_RANGE: u8 = 0;
const RECORD_SINGLE: u8 = 1;

impl AckNakRanges {
    /// Coalesces an unsorted batch of sequence numbers into minimal ranges.
    /// Consecutive values merge; duplicates collapse.
    pub fn from_sequences(mut seqs: Vec<Sequence24>) -> Self {
        let mut ranges = Vec::new();
        if seqs.is_empty() {
            return AckNakRanges { ranges };
        }
        seqs.sort_unstable();
        seqs.dedup();

        let mut start = seqs[0];
        let mut end = start;
        for &seq in &seqs[1..] {
            if seq == end.next() {
                end = seq;
            } else {
                ranges.push(SequenceRange { start, end });
                start = seq;
                end = seq;
            }
        }
        ranges.push(SequenceRange { start, end });
        AckNakRanges { ranges }
    }

    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u16(self.ranges.len() as u16);
        for range in &self.ranges {
            if range.start == range.end {
                dst.put_u8(RECORD_SINGLE);
                range.start.encode_raknet(dst);
            } else {
                dst.put_u8(RECORD_RANGE);
                range.start.encode_raknet(dst);
                range.end.encode_raknet(dst);
            }
        }
    }

    pub fn decode(src: &mut impl Buf) -> Result<Self, DecodeError> {
        let count = u16::decode_raknet(src)? as usize;
        let mut ranges = Vec::with_capacity(count.min(128));
        for _ in 0..count {
            let record = u8::decode_raknet(src)?;
            if record == RECORD_SINGLE {
                let seq = Sequence24::decode_raknet(src)?;
                ranges.push(SequenceRange::single(seq));
            } else {
                let start = Sequence24::decode_raknet(src)?;
                let end = Sequence24::decode_raknet(src)?;
                ranges.push(SequenceRange { start, end });
            }
        }
        Ok(AckNakRanges { ranges })
    }
}
