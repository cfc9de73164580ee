//! Per-peer reliability state and the engine that drives it.
//!
//! A [`Session`] is a pure state machine: the transport layer feeds it raw
//! datagrams and clock readings, and it hands back complete, in-order
//! application payloads plus the encoded datagrams that must go out on the
//! wire. Keeping the socket out of here is what makes the reliability
//! engine testable without the network.

mod inbound;
mod ordering;
mod outbound;
mod rtt;
mod split;

pub use inbound::InboundOutcome;
pub use ordering::OrderingChannels;
pub use rtt::RttEstimator;
pub use split::{SplitAssembler, SplitError};

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::metrics::TransportMetrics;
use crate::protocol::constants::{ORDERING_CHANNEL_COUNT, RECEIVE_WINDOW_SIZE};
use crate::protocol::packet::DecodeError;
use crate::protocol::state::{DisconnectReason, SessionState};
use crate::protocol::types::Sequence24;
use crate::transport::encapsulated_packet::EncapsulatedMessage;

/// Errors surfaced by the reliability engine to the transport driver.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Malformed datagram: drop it and blacklist the peer.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Split reassembly failure: disconnect the session without notifying
    /// the peer.
    #[error(transparent)]
    Split(#[from] SplitError),
}

/// A copy of an already-transmitted datagram, kept until it is ACKed or
/// given up on.
struct RetainedDatagram {
    bytes: Bytes,
    first_send: Instant,
    last_send: Instant,
    transmissions: u32,
}

pub struct Session {
    peer: SocketAddr,
    client_guid: i64,
    state: SessionState,
    mtu: u16,
    last_activity: Instant,
    disconnect_reason: Option<DisconnectReason>,

    // Incoming reliability state.
    receive_window: ReceiveWindow,
    pending_acks: Vec<Sequence24>,
    pending_naks: Vec<Sequence24>,
    splits: SplitAssembler,
    ordering: OrderingChannels,

    // Outgoing reliability state.
    next_datagram_seq: Sequence24,
    next_reliable_number: Sequence24,
    next_ordering_index: [Sequence24; ORDERING_CHANNEL_COUNT],
    next_split_id: u16,
    send_queue: VecDeque<EncapsulatedMessage>,
    unacked: FxHashMap<u32, RetainedDatagram>,
    rtt: RttEstimator,
    consecutive_resends: u32,
    failed_datagrams: u32,

    metrics: Arc<TransportMetrics>,
}

impl Session {
    pub fn new(peer: SocketAddr, mtu: u16, client_guid: i64, metrics: Arc<TransportMetrics>) -> Self {
        let now = Instant::now();
        Session {
            peer,
            client_guid,
            state: SessionState::Connecting,
            mtu,
            last_activity: now,
            disconnect_reason: None,
            receive_window: ReceiveWindow::default(),
            pending_acks: Vec::new(),
            pending_naks: Vec::new(),
            splits: SplitAssembler::new(),
            ordering: OrderingChannels::new(),
            next_datagram_seq: Sequence24::ZERO,
            next_reliable_number: Sequence24::ZERO,
            next_ordering_index: [Sequence24::ZERO; ORDERING_CHANNEL_COUNT],
            next_split_id: 0,
            send_queue: VecDeque::new(),
            unacked: FxHashMap::default(),
            rtt: RttEstimator::new(),
            consecutive_resends: 0,
            failed_datagrams: 0,
            metrics,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn client_guid(&self) -> i64 {
        self.client_guid
    }

    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.disconnect_reason
    }

    pub fn is_evicted(&self) -> bool {
        self.state == SessionState::Evicted
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    pub fn is_inactive(&self, timeout: Duration, now: Instant) -> bool {
        now.duration_since(self.last_activity) > timeout
    }

    /// Marks the session dead. Further datagrams are dropped; the table
    /// cleaner removes the entry on its next pass.
    pub fn evict(&mut self, reason: DisconnectReason) {
        if self.state != SessionState::Evicted {
            self.state = SessionState::Evicted;
            self.disconnect_reason = Some(reason);
        }
    }

    pub fn rtt_ms(&self) -> u64 {
        self.rtt.rtt_ms()
    }

    /// Resends issued since the last ACK came back.
    pub fn consecutive_resends(&self) -> u32 {
        self.consecutive_resends
    }

    pub fn unacked_len(&self) -> usize {
        self.unacked.len()
    }
}

/// Sliding set of datagram sequence numbers already received, for duplicate
/// suppression and NAK gap detection.
#[derive(Default)]
struct ReceiveWindow {
    seen: FxHashSet<u32>,
    highest: Option<Sequence24>,
}

enum Registration {
    Duplicate,
    New { missing: Vec<Sequence24> },
}

impl ReceiveWindow {
    /// Registers an arriving sequence number. New arrivals report the gap
    /// of sequence numbers skipped since the previous highest.
    fn register(&mut self, seq: Sequence24) -> Registration {
        if self.seen.contains(&seq.value()) {
            return Registration::Duplicate;
        }
        if let Some(highest) = self.highest {
            if seq <= highest && highest.distance(seq) > RECEIVE_WINDOW_SIZE as i32 {
                // Far behind the window; treat as a duplicate of forgotten
                // history rather than re-delivering.
                return Registration::Duplicate;
            }
        }
        self.seen.insert(seq.value());

        let mut missing = Vec::new();
        match self.highest {
            Some(highest) if seq > highest => {
                // Gap scan is bounded by the window; a jump past it cannot
                // be NAKed meaningfully anyway.
                if seq.distance(highest) <= RECEIVE_WINDOW_SIZE as i32 {
                    let mut cursor = highest.next();
                    while cursor < seq {
                        if !self.seen.contains(&cursor.value()) {
                            missing.push(cursor);
                        }
                        cursor = cursor.next();
                    }
                }
                self.highest = Some(seq);
            }
            None => self.highest = Some(seq),
            _ => {}
        }
        Registration::New { missing }
    }

    /// Forgets sequence numbers that have fallen out of the window.
    fn prune(&mut self) {
        if let Some(highest) = self.highest {
            self.seen
                .retain(|&v| highest.distance(Sequence24::new(v)) <= RECEIVE_WINDOW_SIZE as i32);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(v: u32) -> Sequence24 {
        Sequence24::new(v)
    }

    #[test]
    fn window_reports_duplicates() {
        let mut window = ReceiveWindow::default();
        assert!(matches!(window.register(seq(0)), Registration::New { .. }));
        assert!(matches!(window.register(seq(0)), Registration::Duplicate));
    }

    #[test]
    fn window_reports_gaps_once() {
        let mut window = ReceiveWindow::default();
        window.register(seq(0));
        match window.register(seq(3)) {
            Registration::New { missing } => assert_eq!(missing, vec![seq(1), seq(2)]),
            _ => panic!("expected new registration"),
        }
        // Late arrival of a previously-missing number is not a gap.
        match window.register(seq(1)) {
            Registration::New { missing } => assert!(missing.is_empty()),
            _ => panic!("expected new registration"),
        }
    }

    #[test]
    fn prune_keeps_the_recent_window() {
        let mut window = ReceiveWindow::default();
        window.register(seq(0));
        window.register(seq(RECEIVE_WINDOW_SIZE + 500));
        window.prune();
        assert!(!window.seen.contains(&0));
        assert!(window.seen.contains(&(RECEIVE_WINDOW_SIZE + 500)));
    }
}
