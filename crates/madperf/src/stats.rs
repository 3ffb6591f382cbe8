// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Run statistics.

use serde::Serialize;
use std::time::Duration;

/// Passive accumulator for one run.
///
/// Only the pipeline loop mutates it; no interior mutability.
#[derive(Debug, Default, Clone)]
pub struct StatsCollector {
    sent_total: u64,
    received_total: u64,
    timeout_total: u64,
    min_us: u64,
    max_us: u64,
    sum_us: u64,
    sent_bytes: u64,
    received_bytes: u64,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one transmitted request.
    pub fn record_send(&mut self, bytes: usize) {
        self.sent_total += 1;
        self.sent_bytes += bytes as u64;
    }

    /// Record a request reported lost by the transport.
    pub fn record_timeout(&mut self) {
        self.timeout_total += 1;
    }

    /// Record a matched reply.
    pub fn record_receive(&mut self, bytes: usize, latency_us: u64) {
        if self.received_total == 0 {
            self.min_us = latency_us;
            self.max_us = latency_us;
        } else {
            self.min_us = self.min_us.min(latency_us);
            self.max_us = self.max_us.max(latency_us);
        }
        self.received_total += 1;
        self.sum_us += latency_us;
        self.received_bytes += bytes as u64;
    }

    /// Snapshot of the counters.
    pub fn report(&self) -> StatsReport {
        StatsReport {
            sent_total: self.sent_total,
            received_total: self.received_total,
            timeout_total: self.timeout_total,
            min_us: self.min_us,
            max_us: self.max_us,
            sum_us: self.sum_us,
            sent_bytes: self.sent_bytes,
            received_bytes: self.received_bytes,
        }
    }
}

/// Immutable statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsReport {
    pub sent_total: u64,
    pub received_total: u64,
    pub timeout_total: u64,
    pub min_us: u64,
    pub max_us: u64,
    pub sum_us: u64,
    pub sent_bytes: u64,
    pub received_bytes: u64,
}

impl StatsReport {
    /// Mean latency, `None` when no reply was matched.
    pub fn avg_us(&self) -> Option<u64> {
        if self.received_total == 0 {
            None
        } else {
            Some(self.sum_us / self.received_total)
        }
    }

    /// Send bandwidth in MiB/s over `elapsed`.
    pub fn send_bandwidth_mbps(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            self.sent_bytes as f64 / 1024.0 / 1024.0 / secs
        } else {
            0.0
        }
    }

    /// Requests sent per second over `elapsed`.
    pub fn send_rate(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            self.sent_total as f64 / secs
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_min_max_avg() {
        let mut stats = StatsCollector::new();
        for latency in [40, 10, 25, 90, 35] {
            stats.record_receive(256, latency);
        }

        let report = stats.report();
        assert_eq!(report.received_total, 5);
        assert_eq!(report.min_us, 10);
        assert_eq!(report.max_us, 90);
        assert_eq!(report.sum_us, 200);
        assert_eq!(report.avg_us(), Some(40));
        assert_eq!(report.received_bytes, 5 * 256);
    }

    #[test]
    fn test_first_sample_seeds_min() {
        let mut stats = StatsCollector::new();
        stats.record_receive(256, 500);
        let report = stats.report();
        assert_eq!(report.min_us, 500);
        assert_eq!(report.max_us, 500);
    }

    #[test]
    fn test_no_samples() {
        let mut stats = StatsCollector::new();
        stats.record_send(256);
        stats.record_timeout();

        let report = stats.report();
        assert_eq!(report.avg_us(), None);
        assert_eq!(report.sent_total, 1);
        assert_eq!(report.timeout_total, 1);
        assert_eq!(report.min_us, 0);
    }

    #[test]
    fn test_report_is_idempotent() {
        let mut stats = StatsCollector::new();
        stats.record_send(256);
        stats.record_receive(256, 12);
        assert_eq!(stats.report(), stats.report());
    }

    #[test]
    fn test_rates() {
        let mut stats = StatsCollector::new();
        for _ in 0..4096 {
            stats.record_send(256);
        }
        let report = stats.report();
        let elapsed = Duration::from_secs(2);

        assert!((report.send_bandwidth_mbps(elapsed) - 0.5).abs() < 1e-9);
        assert!((report.send_rate(elapsed) - 2048.0).abs() < 1e-9);
        assert_eq!(report.send_rate(Duration::ZERO), 0.0);
        assert_eq!(report.send_bandwidth_mbps(Duration::ZERO), 0.0);
    }
}
