use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::protocol::constants::MAX_SPLIT_COUNT;
use crate::transport::encapsulated_packet::EncapsulatedMessage;

/// Reassembly failures are session-fatal: the peer is either hostile or
/// hopelessly confused about its own fragmentation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SplitError {
    #[error("split count {0} is zero or exceeds the {MAX_SPLIT_COUNT}-part limit")]
    CountOutOfRange(u32),

    #[error("split index {index} out of range for count {count}")]
    IndexOutOfRange { index: u32, count: u32 },

    #[error("split id {id} reannounced with count {got}, expected {expected}")]
    CountMismatch { id: u16, expected: u32, got: u32 },
}

struct SplitBuffer {
    parts: Vec<Option<Bytes>>,
    received: u32,
    /// Metadata of part 0, reapplied to the reassembled message.
    head: Option<EncapsulatedMessage>,
    created_at: Instant,
}

/// Collects split-message parts per split id and yields the reassembled
/// message once every slot is filled.
pub struct SplitAssembler {
    buffers: FxHashMap<u16, SplitBuffer>,
}

impl SplitAssembler {
    pub fn new() -> Self {
        SplitAssembler {
            buffers: FxHashMap::default(),
        }
    }

    /// Feeds one encapsulated message through reassembly. Non-split
    /// messages pass straight through. A split part returns `None` until
    /// the final part lands, at which point the whole message comes back
    /// carrying part 0's reliability and ordering metadata.
    pub fn feed(
        &mut self,
        msg: EncapsulatedMessage,
        now: Instant,
    ) -> Result<Option<EncapsulatedMessage>, SplitError> {
        let split = match msg.split {
            Some(split) => split,
            None => return Ok(Some(msg)),
        };

        if split.count == 0 || split.count > MAX_SPLIT_COUNT {
            return Err(SplitError::CountOutOfRange(split.count));
        }
        if split.index >= split.count {
            return Err(SplitError::IndexOutOfRange {
                index: split.index,
                count: split.count,
            });
        }

        let buffer = self.buffers.entry(split.id).or_insert_with(|| SplitBuffer {
            parts: vec![None; split.count as usize],
            received: 0,
            head: None,
            created_at: now,
        });
        if buffer.parts.len() as u32 != split.count {
            let expected = buffer.parts.len() as u32;
            return Err(SplitError::CountMismatch {
                id: split.id,
                expected,
                got: split.count,
            });
        }

        let slot = &mut buffer.parts[split.index as usize];
        if slot.is_some() {
            // Retransmitted part; the slot is already populated.
            return Ok(None);
        }
        *slot = Some(msg.payload.clone());
        buffer.received += 1;
        if split.index == 0 {
            buffer.head = Some(msg);
        }

        if buffer.received < split.count {
            return Ok(None);
        }

        let buffer = self
            .buffers
            .remove(&split.id)
            .expect("buffer present, just updated");
        let mut joined = BytesMut::new();
        for part in buffer.parts {
            joined.extend_from_slice(&part.expect("all slots filled"));
        }
        let head = buffer.head.expect("part 0 present on completion");
        Ok(Some(EncapsulatedMessage {
            split: None,
            payload: joined.freeze(),
            ..head
        }))
    }

    /// Discards incomplete buffers older than `timeout`.
    pub fn discard_stale(&mut self, timeout: Duration, now: Instant) {
        self.buffers
            .retain(|_, buf| now.duration_since(buf.created_at) < timeout);
    }

    pub fn pending_len(&self) -> usize {
        self.buffers.len()
    }
}

impl Default for SplitAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::reliability::Reliability;
    use crate::protocol::types::Sequence24;
    use crate::transport::encapsulated_packet::SplitInfo;

    fn part(id: u16, count: u32, index: u32, payload: &'static [u8]) -> EncapsulatedMessage {
        EncapsulatedMessage {
            reliability: Reliability::ReliableOrdered,
            reliable_number: Some(Sequence24::new(index)),
            sequence_index: None,
            ordering_index: Some(Sequence24::new(5)),
            ordering_channel: Some(2),
            split: Some(SplitInfo { count, id, index }),
            payload: Bytes::from_static(payload),
        }
    }

    #[test]
    fn completes_in_arrival_order_2_0_1() {
        let mut asm = SplitAssembler::new();
        let now = Instant::now();

        assert!(asm.feed(part(7, 3, 2, b"cc"), now).unwrap().is_none());
        assert!(asm.feed(part(7, 3, 0, b"aa"), now).unwrap().is_none());
        let whole = asm.feed(part(7, 3, 1, b"bb"), now).unwrap().unwrap();

        assert_eq!(whole.payload, Bytes::from_static(b"aabbcc"));
        assert_eq!(whole.split, None);
        // Reassembled message keeps part 0's ordering metadata.
        assert_eq!(whole.ordering_index, Some(Sequence24::new(5)));
        assert_eq!(whole.ordering_channel, Some(2));
        assert_eq!(asm.pending_len(), 0);
    }

    #[test]
    fn retransmitted_part_is_ignored() {
        let mut asm = SplitAssembler::new();
        let now = Instant::now();

        assert!(asm.feed(part(1, 2, 0, b"x"), now).unwrap().is_none());
        assert!(asm.feed(part(1, 2, 0, b"x"), now).unwrap().is_none());
        let whole = asm.feed(part(1, 2, 1, b"y"), now).unwrap().unwrap();
        assert_eq!(whole.payload, Bytes::from_static(b"xy"));
    }

    #[test]
    fn non_split_passes_through() {
        let mut asm = SplitAssembler::new();
        let msg = EncapsulatedMessage {
            split: None,
            ..part(0, 1, 0, b"plain")
        };
        let out = asm.feed(msg, Instant::now()).unwrap().unwrap();
        assert_eq!(out.payload, Bytes::from_static(b"plain"));
    }

    #[test]
    fn oversized_count_is_rejected() {
        let mut asm = SplitAssembler::new();
        let err = asm
            .feed(part(3, MAX_SPLIT_COUNT + 1, 0, b"x"), Instant::now())
            .unwrap_err();
        assert_eq!(err, SplitError::CountOutOfRange(MAX_SPLIT_COUNT + 1));
    }

    #[test]
    fn count_mismatch_is_rejected() {
        let mut asm = SplitAssembler::new();
        let now = Instant::now();
        asm.feed(part(9, 3, 0, b"a"), now).unwrap();
        let err = asm.feed(part(9, 4, 1, b"b"), now).unwrap_err();
        assert_eq!(
            err,
            SplitError::CountMismatch {
                id: 9,
                expected: 3,
                got: 4
            }
        );
    }

    #[test]
    fn index_out_of_range_is_rejected() {
        let mut asm = SplitAssembler::new();
        let err = asm.feed(part(2, 3, 3, b"x"), Instant::now()).unwrap_err();
        assert_eq!(err, SplitError::IndexOutOfRange { index: 3, count: 3 });
    }

    #[test]
    fn stale_buffers_are_discarded() {
        let mut asm = SplitAssembler::new();
        let now = Instant::now();
        asm.feed(part(4, 2, 0, b"a"), now).unwrap();
        assert_eq!(asm.pending_len(), 1);
        asm.discard_stale(Duration::ZERO, now + Duration::from_millis(1));
        assert_eq!(asm.pending_len(), 0);
    }
}
