//! Peer connection statistics tracking.
//!
//! Counters are updated from both the receive and the logic context, so they are plain
//! atomics; [`PeerStatistics`] is the copy handed to callers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of the traffic exchanged with one peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerStatistics {
    /// Datagrams sent to this peer
    pub packets_sent: u64,
    /// Datagrams received from this peer
    pub packets_received: u64,
    /// Bytes sent to this peer, headers included
    pub bytes_sent: u64,
    /// Bytes received from this peer, headers included
    pub bytes_received: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatisticsCounters {
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl StatisticsCounters {
    pub(crate) fn record_sent(&self, bytes: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self, bytes: usize) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> PeerStatistics {
        PeerStatistics {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statistics_initialized_to_zero() {
        let stats = StatisticsCounters::default().snapshot();
        assert_eq!(stats, PeerStatistics::default());
    }

    #[test]
    fn test_statistics_accumulate() {
        let counters = StatisticsCounters::default();
        counters.record_sent(100);
        counters.record_sent(20);
        counters.record_received(7);

        let stats = counters.snapshot();
        assert_eq!(stats.packets_sent, 2);
        assert_eq!(stats.bytes_sent, 120);
        assert_eq!(stats.packets_received, 1);
        assert_eq!(stats.bytes_received, 7);
    }
}
