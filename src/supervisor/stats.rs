//! Cumulative traffic counters.
//!
//! The supervised process reports absolute byte counts per sample; the
//! aggregator converts them into deltas and keeps running totals for the
//! lifetime of one process instance. Counters reset only explicitly or when
//! a new process starts.

use serde::{Deserialize, Serialize};

/// Absolute upload/download byte counts. Also used for deltas and totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficSnapshot {
    pub upload: u64,
    pub download: u64,
}

/// Converts absolute counter snapshots into deltas and accumulates totals.
#[derive(Debug, Default)]
pub struct StatisticsAggregator {
    last: Option<TrafficSnapshot>,
    totals: TrafficSnapshot,
}

impl StatisticsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an absolute snapshot; returns the delta since the previous
    /// one. A counter that moved backwards means the reporting process
    /// restarted, so the sample re-baselines instead of underflowing.
    pub fn record(&mut self, snapshot: TrafficSnapshot) -> TrafficSnapshot {
        let delta = match self.last {
            Some(last) if snapshot.upload >= last.upload && snapshot.download >= last.download => {
                TrafficSnapshot {
                    upload: snapshot.upload - last.upload,
                    download: snapshot.download - last.download,
                }
            }
            Some(_) => snapshot,
            None => snapshot,
        };
        self.last = Some(snapshot);
        self.totals.upload += delta.upload;
        self.totals.download += delta.download;
        delta
    }

    /// Cumulative totals since the last reset.
    pub fn totals(&self) -> TrafficSnapshot {
        self.totals
    }

    /// Zero the totals and forget the baseline (explicit reset or process
    /// restart).
    pub fn reset(&mut self) {
        self.last = None;
        self.totals = TrafficSnapshot::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(upload: u64, download: u64) -> TrafficSnapshot {
        TrafficSnapshot { upload, download }
    }

    #[test]
    fn first_sample_is_its_own_delta() {
        let mut agg = StatisticsAggregator::new();
        assert_eq!(agg.record(snap(100, 250)), snap(100, 250));
        assert_eq!(agg.totals(), snap(100, 250));
    }

    #[test]
    fn subsequent_samples_produce_deltas() {
        let mut agg = StatisticsAggregator::new();
        agg.record(snap(100, 250));
        assert_eq!(agg.record(snap(150, 300)), snap(50, 50));
        assert_eq!(agg.totals(), snap(150, 300));
    }

    #[test]
    fn counter_regression_re_baselines() {
        let mut agg = StatisticsAggregator::new();
        agg.record(snap(1000, 2000));
        // Process restarted; its counters began again from small values.
        assert_eq!(agg.record(snap(10, 20)), snap(10, 20));
        assert_eq!(agg.totals(), snap(1010, 2020));
    }

    #[test]
    fn reset_zeroes_totals_and_baseline() {
        let mut agg = StatisticsAggregator::new();
        agg.record(snap(100, 100));
        agg.reset();
        assert_eq!(agg.totals(), TrafficSnapshot::default());
        assert_eq!(agg.record(snap(5, 7)), snap(5, 7));
    }

    #[test]
    fn repeated_identical_samples_add_nothing() {
        let mut agg = StatisticsAggregator::new();
        agg.record(snap(100, 250));
        assert_eq!(agg.record(snap(100, 250)), snap(0, 0));
        assert_eq!(agg.totals(), snap(100, 250));
    }
}
