use bytes::Bytes;
use rustc_hash::FxHashMap;

use crate::protocol::constants::ORDERING_CHANNEL_COUNT;
use crate::protocol::types::Sequence24;

/// Out-of-order messages buffered per channel beyond this count are shed;
/// a reliable sender will resend them once the gap closes.
const MAX_REORDER_BUFFER: usize = 256;

/// The 32 independent FIFO lanes for ReliableOrdered delivery, plus the
/// newest-wins index tracking for sequenced reliabilities.
pub struct OrderingChannels {
    channels: [Channel; ORDERING_CHANNEL_COUNT],
}

#[derive(Default)]
struct Channel {
    expected_index: Sequence24,
    reorder: FxHashMap<u32, Bytes>,
    highest_sequenced: Option<Sequence24>,
}

impl OrderingChannels {
    pub fn new() -> Self {
        OrderingChannels {
            channels: std::array::from_fn(|_| Channel::default()),
        }
    }

    /// Accepts a ReliableOrdered message and returns every payload that is
    /// now deliverable, in strict index order. The caller guarantees
    /// `channel < ORDERING_CHANNEL_COUNT` (enforced at decode).
    pub fn insert_ordered(
        &mut self,
        channel: u8,
        ordering_index: Sequence24,
        payload: Bytes,
    ) -> Vec<Bytes> {
        let ch = &mut self.channels[channel as usize];

        if ordering_index < ch.expected_index {
            // Stale duplicate of an index already delivered.
            return Vec::new();
        }

        if ordering_index == ch.expected_index {
            let mut ready = vec![payload];
            ch.expected_index = ch.expected_index.next();
            while let Some(next) = ch.reorder.remove(&ch.expected_index.value()) {
                ready.push(next);
                ch.expected_index = ch.expected_index.next();
            }
            return ready;
        }

        if ch.reorder.len() < MAX_REORDER_BUFFER {
            ch.reorder.insert(ordering_index.value(), payload);
        }
        Vec::new()
    }

    /// Newest-wins admission for sequenced messages; stale arrivals yield
    /// `None`.
    pub fn insert_sequenced(
        &mut self,
        channel: u8,
        sequence_index: Sequence24,
        payload: Bytes,
    ) -> Option<Bytes> {
        let ch = &mut self.channels[channel as usize];
        match ch.highest_sequenced {
            Some(highest) if sequence_index <= highest => None,
            _ => {
                ch.highest_sequenced = Some(sequence_index);
                Some(payload)
            }
        }
    }
}

impl Default for OrderingChannels {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idx(v: u32) -> Sequence24 {
        Sequence24::new(v)
    }

    #[test]
    fn in_order_stream_delivers_immediately() {
        let mut oc = OrderingChannels::new();
        for i in 0..3 {
            let out = oc.insert_ordered(0, idx(i), Bytes::from(vec![i as u8]));
            assert_eq!(out.len(), 1);
        }
    }

    #[test]
    fn reorder_2_0_1_drains_contiguously() {
        let mut oc = OrderingChannels::new();

        assert!(oc.insert_ordered(0, idx(2), Bytes::from_static(b"c")).is_empty());

        let out = oc.insert_ordered(0, idx(0), Bytes::from_static(b"a"));
        assert_eq!(out, vec![Bytes::from_static(b"a")]);

        let out = oc.insert_ordered(0, idx(1), Bytes::from_static(b"b"));
        assert_eq!(out, vec![Bytes::from_static(b"b"), Bytes::from_static(b"c")]);
    }

    #[test]
    fn stale_duplicate_is_dropped() {
        let mut oc = OrderingChannels::new();
        assert_eq!(oc.insert_ordered(0, idx(0), Bytes::from_static(b"a")).len(), 1);
        assert!(oc.insert_ordered(0, idx(0), Bytes::from_static(b"a")).is_empty());
    }

    #[test]
    fn channels_are_independent() {
        let mut oc = OrderingChannels::new();
        assert!(oc.insert_ordered(1, idx(1), Bytes::from_static(b"later")).is_empty());
        let out = oc.insert_ordered(0, idx(0), Bytes::from_static(b"now"));
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn ordered_delivery_across_wrap_point() {
        let mut oc = OrderingChannels::new();
        let ch = &mut oc.channels[0];
        ch.expected_index = idx(0xFF_FFFF);

        assert!(oc.insert_ordered(0, idx(0), Bytes::from_static(b"b")).is_empty());
        let out = oc.insert_ordered(0, idx(0xFF_FFFF), Bytes::from_static(b"a"));
        assert_eq!(out, vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
    }

    #[test]
    fn sequenced_newest_wins() {
        let mut oc = OrderingChannels::new();
        assert!(oc.insert_sequenced(0, idx(1), Bytes::from_static(b"a")).is_some());
        assert!(oc.insert_sequenced(0, idx(3), Bytes::from_static(b"c")).is_some());
        assert!(oc.insert_sequenced(0, idx(2), Bytes::from_static(b"b")).is_none());
    }
}
