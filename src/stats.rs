//! Verdict counters for the packet path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::firewall::Verdict;

/// Atomic counters updated once per dispatched packet.
pub struct Stats {
    pub packets: AtomicU64,
    pub accepted: AtomicU64,
    pub dropped: AtomicU64,
    pub dns_blocked: AtomicU64,
    /// Packets let through because they could not be classified.
    pub unparsed: AtomicU64,
    /// Cumulative decision time in nanoseconds for averaging.
    total_decision_time_ns: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            packets: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            dns_blocked: AtomicU64::new(0),
            unparsed: AtomicU64::new(0),
            total_decision_time_ns: AtomicU64::new(0),
        }
    }

    pub fn record_verdict(&self, verdict: Verdict, elapsed: Duration) {
        self.packets.fetch_add(1, Ordering::Relaxed);
        let counter = match verdict {
            Verdict::Accept => &self.accepted,
            Verdict::Drop => &self.dropped,
            Verdict::DnsBlocked => &self.dns_blocked,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.total_decision_time_ns
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn record_unparsed(&self) {
        self.packets.fetch_add(1, Ordering::Relaxed);
        self.unparsed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot_and_reset(&self) -> StatsSnapshot {
        let packets = self.packets.swap(0, Ordering::Relaxed);
        let accepted = self.accepted.swap(0, Ordering::Relaxed);
        let dropped = self.dropped.swap(0, Ordering::Relaxed);
        let dns_blocked = self.dns_blocked.swap(0, Ordering::Relaxed);
        let unparsed = self.unparsed.swap(0, Ordering::Relaxed);
        let total_ns = self.total_decision_time_ns.swap(0, Ordering::Relaxed);

        let decided = accepted + dropped + dns_blocked;
        let avg_decision_us = if decided > 0 {
            (total_ns as f64 / decided as f64) / 1000.0
        } else {
            0.0
        };

        StatsSnapshot {
            packets,
            accepted,
            dropped,
            dns_blocked,
            unparsed,
            avg_decision_us,
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    pub packets: u64,
    pub accepted: u64,
    pub dropped: u64,
    pub dns_blocked: u64,
    pub unparsed: u64,
    pub avg_decision_us: f64,
}
