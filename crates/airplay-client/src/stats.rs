//! Stream statistics for monitoring packet loss and retransmit activity.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Live sender statistics.
///
/// Written by the reactor, read from any thread through
/// [`SenderHandle::stats`](crate::SenderHandle::stats). All fields are
/// atomic, so reads/writes are lock-free.
#[derive(Debug, Default)]
pub struct StreamStats {
    /// Audio packets handed to the ring (sent once per streaming session).
    pub packets_sent: AtomicU64,
    /// Datagrams the audio socket refused with `WouldBlock`.
    pub packets_dropped: AtomicU64,
    pub sync_sent: AtomicU64,
    pub timing_replies: AtomicU64,
    /// Retransmit requests received.
    pub rtx_requested: AtomicU64,
    /// Packets resent in answer to those requests.
    pub rtx_fulfilled: AtomicU64,
    /// Requests outside the retained window.
    pub rtx_rejected: AtomicU64,
    pub session_failures: AtomicU64,
}

impl StreamStats {
    /// Create a new zeroed stats instance.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        for counter in self.counters() {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn counters(&self) -> [&AtomicU64; 8] {
        [
            &self.packets_sent,
            &self.packets_dropped,
            &self.sync_sent,
            &self.timing_replies,
            &self.rtx_requested,
            &self.rtx_fulfilled,
            &self.rtx_rejected,
            &self.session_failures,
        ]
    }

    /// Get a snapshot of current stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            sync_sent: self.sync_sent.load(Ordering::Relaxed),
            timing_replies: self.timing_replies.load(Ordering::Relaxed),
            rtx_requested: self.rtx_requested.load(Ordering::Relaxed),
            rtx_fulfilled: self.rtx_fulfilled.load(Ordering::Relaxed),
            rtx_rejected: self.rtx_rejected.load(Ordering::Relaxed),
            session_failures: self.session_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of stream statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub packets_sent: u64,
    pub packets_dropped: u64,
    pub sync_sent: u64,
    pub timing_replies: u64,
    pub rtx_requested: u64,
    pub rtx_fulfilled: u64,
    pub rtx_rejected: u64,
    pub session_failures: u64,
}

impl StatsSnapshot {
    /// Packet loss rate as a percentage (resent / sent * 100).
    pub fn loss_percent(&self) -> f64 {
        if self.packets_sent == 0 {
            0.0
        } else {
            (self.rtx_fulfilled as f64 / self.packets_sent as f64) * 100.0
        }
    }
}
