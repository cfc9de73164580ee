use std::time::Instant;

use bytes::{Buf, Bytes};

use crate::metrics::TransportMetrics;
use crate::protocol::ack::AckNakRanges;
use crate::protocol::types::Sequence24;
use crate::transport::datagram::{Datagram, DatagramPayload};
use crate::transport::encapsulated_packet::EncapsulatedMessage;

use super::{Registration, Session, SessionError};

/// What one incoming datagram produced: payloads to hand upward and
/// retransmissions to put back on the wire (NAK-driven).
#[derive(Default, Debug)]
pub struct InboundOutcome {
    pub deliveries: Vec<Bytes>,
    pub resends: Vec<Bytes>,
}

impl Session {
    /// Runs one received datagram through the reliability engine.
    pub fn handle_datagram(
        &mut self,
        mut bytes: impl Buf,
        now: Instant,
    ) -> Result<InboundOutcome, SessionError> {
        let datagram = Datagram::decode(&mut bytes)?;
        let mut outcome = InboundOutcome::default();
        match datagram.payload {
            DatagramPayload::Ack(ranges) => self.process_ack(&ranges, now),
            DatagramPayload::Nak(ranges) => {
                outcome.resends = self.process_nak(&ranges, now);
            }
            DatagramPayload::Messages(messages) => {
                outcome.deliveries = self.handle_data(datagram.header.sequence, messages, now)?;
            }
        }
        Ok(outcome)
    }

    /// Connected-data path: duplicate suppression, ACK scheduling, split
    /// reassembly, ordered delivery.
    fn handle_data(
        &mut self,
        sequence: Sequence24,
        messages: Vec<EncapsulatedMessage>,
        now: Instant,
    ) -> Result<Vec<Bytes>, SessionError> {
        // The ACK goes out even for duplicates; the peer may have lost the
        // first one.
        self.pending_acks.push(sequence);

        match self.receive_window.register(sequence) {
            Registration::Duplicate => return Ok(Vec::new()),
            Registration::New { missing } => {
                self.pending_naks.retain(|s| *s != sequence);
                self.pending_naks.extend(missing);
            }
        }

        let mut deliveries = Vec::new();
        for msg in messages {
            let msg = match self.splits.feed(msg, now)? {
                Some(whole) => whole,
                None => continue,
            };
            self.deliver(msg, &mut deliveries);
        }
        Ok(deliveries)
    }

    fn deliver(&mut self, msg: EncapsulatedMessage, deliveries: &mut Vec<Bytes>) {
        if msg.reliability.is_ordered() {
            let (Some(index), Some(channel)) = (msg.ordering_index, msg.ordering_channel) else {
                // Ordered without ordering metadata: nothing to order by.
                return;
            };
            deliveries.extend(self.ordering.insert_ordered(channel, index, msg.payload));
        } else if msg.reliability.is_sequenced() {
            let (Some(index), Some(channel)) = (msg.sequence_index, msg.ordering_channel) else {
                return;
            };
            if let Some(payload) = self.ordering.insert_sequenced(channel, index, msg.payload) {
                deliveries.push(payload);
            }
        } else {
            deliveries.push(msg.payload);
        }
    }

    /// ACK path: release retained datagrams and feed the RTT estimator.
    pub(super) fn process_ack(&mut self, ranges: &AckNakRanges, now: Instant) {
        for range in &ranges.ranges {
            range.for_each(|seq| {
                if let Some(retained) = self.unacked.remove(&seq.value()) {
                    let sample = now.duration_since(retained.last_send).as_millis() as u64;
                    self.rtt.on_sample(sample);
                    self.consecutive_resends = 0;
                }
            });
        }
    }

    /// NAK path: immediate retransmission of retained bytes; RTT sampled
    /// from the original send time.
    pub(super) fn process_nak(&mut self, ranges: &AckNakRanges, now: Instant) -> Vec<Bytes> {
        let mut resends = Vec::new();
        if self.is_evicted() {
            return resends;
        }
        for range in &ranges.ranges {
            range.for_each(|seq| {
                if let Some(retained) = self.unacked.get_mut(&seq.value()) {
                    let sample = now.duration_since(retained.first_send).as_millis() as u64;
                    self.rtt.on_sample(sample);
                    retained.transmissions += 1;
                    retained.last_send = now;
                    self.consecutive_resends += 1;
                    TransportMetrics::incr(&self.metrics.resend_count);
                    resends.push(retained.bytes.clone());
                }
            });
        }
        resends
    }
}
