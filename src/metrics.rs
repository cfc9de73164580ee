//! Server-wide telemetry counters, updated with atomic fetch-and-add from
//! every worker. Values are informational; nothing in the protocol relies
//! on them.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct TransportMetrics {
    pub packets_received: AtomicU64,
    pub bytes_received: AtomicU64,
    pub packets_sent: AtomicU64,
    pub bytes_sent: AtomicU64,

    /// Datagrams retransmitted, whether NAK- or RTO-driven.
    pub resend_count: AtomicU64,
    /// Datagrams given up on after the transmission cap.
    pub failed_datagrams: AtomicU64,
    /// Handshakes refused by the admission controller.
    pub denied_connection_requests: AtomicU64,
    /// Datagrams dropped before reaching a session (malformed, unknown
    /// peer, evicted session).
    pub dropped_datagrams: AtomicU64,
    /// ACK datagrams emitted.
    pub acks_sent: AtomicU64,
    /// NAK datagrams emitted.
    pub naks_sent: AtomicU64,
    /// Sessions currently in the table; telemetry only, never used for
    /// admission decisions.
    pub session_count: AtomicU64,
}

impl TransportMetrics {
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}
