use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};

use crate::metrics::TransportMetrics;
use crate::protocol::ack::AckNakRanges;
use crate::protocol::constants::{
    DATAGRAM_HEADER_SIZE, MAX_DATAGRAM_FAILURES, MAX_TRANSMISSION_COUNT,
    SPLIT_REASSEMBLY_TIMEOUT,
};
use crate::protocol::packet::{RaknetEncodable, RaknetPacket};
use crate::protocol::reliability::Reliability;
use crate::protocol::state::DisconnectReason;
use crate::transport::datagram::Datagram;
use crate::transport::encapsulated_packet::{EncapsulatedMessage, SplitInfo};

use super::{RetainedDatagram, Session};

/// Encoded size of a frame header for the given reliability, excluding the
/// payload itself.
fn frame_overhead(reliability: Reliability, split: bool) -> usize {
    let mut overhead = 1 + 2;
    if reliability.is_reliable() {
        overhead += 3;
    }
    if reliability.is_sequenced() {
        overhead += 3;
    }
    if reliability.is_ordered() || reliability.is_sequenced() {
        overhead += 3 + 1;
    }
    if split {
        overhead += 4 + 2 + 4;
    }
    overhead
}

impl Session {
    /// Largest payload that still fits a single, unsplit datagram.
    pub fn max_single_payload(&self, reliability: Reliability) -> usize {
        self.mtu as usize - DATAGRAM_HEADER_SIZE - frame_overhead(reliability, false)
    }

    /// Frames an outgoing application payload: assigns reliability and
    /// ordering indices, fragmenting to the MTU when needed. Frames sit in
    /// the send queue until [`Session::flush`].
    pub fn queue_message(&mut self, payload: Bytes, reliability: Reliability, channel: u8) {
        let (ordering_index, ordering_channel) = if reliability.is_ordered() {
            let index = self.next_ordering_index[channel as usize].fetch_next();
            (Some(index), Some(channel))
        } else {
            (None, None)
        };
        let (sequence_index, ordering_channel) = if reliability.is_sequenced() {
            // Sequenced messages ride the ordering channel's index space.
            let index = self.next_ordering_index[channel as usize].fetch_next();
            (Some(index), Some(channel))
        } else {
            (None, ordering_channel)
        };

        if payload.len() <= self.max_single_payload(reliability) {
            let reliable_number = reliability
                .is_reliable()
                .then(|| self.next_reliable_number.fetch_next());
            self.send_queue.push_back(EncapsulatedMessage {
                reliability,
                reliable_number,
                sequence_index,
                ordering_index,
                ordering_channel,
                split: None,
                payload,
            });
            return;
        }

        // Fragment: parts share the split id and ordering index; each part
        // carries its own reliable message number.
        let capacity =
            self.mtu as usize - DATAGRAM_HEADER_SIZE - frame_overhead(reliability, true);
        let count = payload.len().div_ceil(capacity) as u32;
        let split_id = self.next_split_id;
        self.next_split_id = self.next_split_id.wrapping_add(1);

        for index in 0..count {
            let start = index as usize * capacity;
            let end = (start + capacity).min(payload.len());
            let reliable_number = reliability
                .is_reliable()
                .then(|| self.next_reliable_number.fetch_next());
            self.send_queue.push_back(EncapsulatedMessage {
                reliability,
                reliable_number,
                sequence_index,
                ordering_index,
                ordering_channel,
                split: Some(SplitInfo {
                    count,
                    id: split_id,
                    index,
                }),
                payload: payload.slice(start..end),
            });
        }
    }

    /// Convenience for control packets sent inside the session.
    pub fn queue_packet(&mut self, packet: &RaknetPacket, reliability: Reliability, channel: u8) {
        let mut buf = BytesMut::new();
        packet.encode(&mut buf);
        self.queue_message(buf.freeze(), reliability, channel);
    }

    /// Packs queued frames into MTU-sized datagrams, retains each for
    /// retransmission, and returns the encoded bytes to transmit.
    pub fn flush(&mut self, now: Instant) -> Vec<Bytes> {
        let mut out = Vec::new();
        while !self.send_queue.is_empty() {
            let sequence = self.next_datagram_seq.fetch_next();
            let mut buf = BytesMut::with_capacity(self.mtu as usize);
            Datagram::data(sequence, Vec::new()).encode(&mut buf);

            while let Some(front) = self.send_queue.front() {
                if buf.len() + front.encoded_size() > self.mtu as usize {
                    break;
                }
                let msg = self.send_queue.pop_front().expect("front checked");
                msg.encode_raknet(&mut buf);
            }

            if buf.len() == DATAGRAM_HEADER_SIZE {
                // A frame larger than the MTU would loop forever; drop it.
                self.next_datagram_seq = sequence;
                self.send_queue.pop_front();
                continue;
            }

            let bytes = buf.freeze();
            self.unacked.insert(
                sequence.value(),
                RetainedDatagram {
                    bytes: bytes.clone(),
                    first_send: now,
                    last_send: now,
                    transmissions: 1,
                },
            );
            out.push(bytes);
        }
        out
    }

    /// Periodic pass (≤10 ms cadence): drains the ACK/NAK queues, scans
    /// retained datagrams for RTO expiry, sheds stale split buffers, and
    /// checks the inactivity timeout. Returns datagrams to transmit.
    pub fn tick(&mut self, inactivity_timeout: Duration, now: Instant) -> Vec<Bytes> {
        let mut out = Vec::new();
        if self.is_evicted() {
            return out;
        }

        if self.is_inactive(inactivity_timeout, now) {
            self.evict(DisconnectReason::TimedOut);
            return out;
        }

        if !self.pending_acks.is_empty() {
            let ranges = AckNakRanges::from_sequences(std::mem::take(&mut self.pending_acks));
            let mut buf = BytesMut::new();
            Datagram::ack(ranges).encode(&mut buf);
            out.push(buf.freeze());
            TransportMetrics::incr(&self.metrics.acks_sent);
        }

        if !self.pending_naks.is_empty() {
            let ranges = AckNakRanges::from_sequences(std::mem::take(&mut self.pending_naks));
            let mut buf = BytesMut::new();
            Datagram::nak(ranges).encode(&mut buf);
            out.push(buf.freeze());
            TransportMetrics::incr(&self.metrics.naks_sent);
        }

        out.extend(self.resend_expired(now));
        if self.is_evicted() {
            return out;
        }

        self.splits.discard_stale(SPLIT_REASSEMBLY_TIMEOUT, now);
        self.receive_window.prune();

        out.extend(self.flush(now));
        out
    }

    /// RTO-driven retransmission with the give-up cap.
    fn resend_expired(&mut self, now: Instant) -> Vec<Bytes> {
        let rto = Duration::from_millis(self.rtt.rto_ms());
        let expired: Vec<u32> = self
            .unacked
            .iter()
            .filter(|(_, r)| now.duration_since(r.last_send) > rto)
            .map(|(&seq, _)| seq)
            .collect();

        let mut out = Vec::new();
        for seq in expired {
            let give_up = match self.unacked.get(&seq) {
                Some(retained) => retained.transmissions >= MAX_TRANSMISSION_COUNT,
                None => continue,
            };

            if give_up {
                self.unacked.remove(&seq);
                self.failed_datagrams += 1;
                TransportMetrics::incr(&self.metrics.failed_datagrams);
                if self.failed_datagrams > MAX_DATAGRAM_FAILURES {
                    self.evict(DisconnectReason::ResendCapExceeded);
                    return out;
                }
                continue;
            }

            let retained = self.unacked.get_mut(&seq).expect("present, checked above");
            retained.transmissions += 1;
            retained.last_send = now;
            self.consecutive_resends += 1;
            TransportMetrics::incr(&self.metrics.resend_count);
            out.push(retained.bytes.clone());
        }
        out
    }
}
