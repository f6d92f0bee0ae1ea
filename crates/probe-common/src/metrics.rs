//! Latency metrics collection.
//!
//! A fixed ring buffer of latency samples with running min/max/mean and
//! percentile queries. Used for interrupt-to-dispatch latency in the
//! scheduler and for trigger-to-reception latency at the collector.

use serde::Serialize;
use std::time::Duration;

/// Latency sample collector backed by a ring buffer.
#[derive(Debug)]
pub struct LatencyMetrics {
    /// Ring buffer of latencies in nanoseconds.
    samples: Box<[u64]>,
    /// Current write position in the ring buffer.
    write_pos: usize,
    /// Number of samples held (saturates at buffer size).
    sample_count: usize,
    /// Total samples ever recorded.
    total: u64,
    min_ns: u64,
    max_ns: u64,
    sum_ns: u64,
    /// Samples that exceeded the budget.
    over_budget: u64,
    /// Latency budget in nanoseconds.
    budget_ns: u64,
}

impl LatencyMetrics {
    /// Create a collector retaining `histogram_size` samples.
    ///
    /// Samples longer than `budget` are counted as over budget.
    #[must_use]
    pub fn new(histogram_size: usize, budget: Duration) -> Self {
        let size = histogram_size.max(1);
        Self {
            samples: vec![0u64; size].into_boxed_slice(),
            write_pos: 0,
            sample_count: 0,
            total: 0,
            min_ns: u64::MAX,
            max_ns: 0,
            sum_ns: 0,
            over_budget: 0,
            budget_ns: duration_ns(budget),
        }
    }

    /// Record one latency sample.
    pub fn record(&mut self, latency: Duration) {
        self.record_ns(duration_ns(latency));
    }

    /// Record one latency sample given in nanoseconds.
    pub fn record_ns(&mut self, ns: u64) {
        self.samples[self.write_pos] = ns;
        self.write_pos = (self.write_pos + 1) % self.samples.len();
        self.sample_count = (self.sample_count + 1).min(self.samples.len());

        self.total += 1;
        self.min_ns = self.min_ns.min(ns);
        self.max_ns = self.max_ns.max(ns);
        self.sum_ns = self.sum_ns.wrapping_add(ns);

        if ns > self.budget_ns {
            self.over_budget += 1;
        }
    }

    /// Total samples recorded.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Smallest latency seen.
    #[must_use]
    pub fn min(&self) -> Option<Duration> {
        (self.total > 0).then(|| Duration::from_nanos(self.min_ns))
    }

    /// Largest latency seen.
    #[must_use]
    pub fn max(&self) -> Option<Duration> {
        (self.total > 0).then(|| Duration::from_nanos(self.max_ns))
    }

    /// Mean latency.
    #[must_use]
    pub fn mean(&self) -> Option<Duration> {
        (self.total > 0).then(|| Duration::from_nanos(self.sum_ns / self.total))
    }

    /// Number of samples above the budget.
    #[must_use]
    pub fn over_budget(&self) -> u64 {
        self.over_budget
    }

    /// Compute a percentile (0.0 to 100.0) over the retained samples.
    ///
    /// Returns `None` when empty or when `percentile` is out of range.
    #[must_use]
    pub fn percentile(&self, percentile: f64) -> Option<Duration> {
        if !valid_percentile(percentile) {
            return None;
        }
        let sorted = self.sorted_samples()?;
        Some(Duration::from_nanos(sorted[rank(percentile, sorted.len())]))
    }

    /// Compute several percentiles with a single sort. Invalid entries are skipped.
    #[must_use]
    pub fn percentiles(&self, percentiles: &[f64]) -> Vec<(f64, Duration)> {
        let Some(sorted) = self.sorted_samples() else {
            return vec![];
        };
        percentiles
            .iter()
            .copied()
            .filter(|p| valid_percentile(*p))
            .map(|p| (p, Duration::from_nanos(sorted[rank(p, sorted.len())])))
            .collect()
    }

    /// Serializable summary of the collected samples.
    #[must_use]
    pub fn snapshot(&self) -> LatencySnapshot {
        let any = self.total > 0;
        LatencySnapshot {
            total: self.total,
            min_ns: any.then_some(self.min_ns),
            max_ns: any.then_some(self.max_ns),
            mean_ns: any.then(|| self.sum_ns / self.total),
            over_budget: self.over_budget,
            sample_count: self.sample_count,
        }
    }

    /// Drop all samples and statistics.
    pub fn reset(&mut self) {
        self.samples.fill(0);
        self.write_pos = 0;
        self.sample_count = 0;
        self.total = 0;
        self.min_ns = u64::MAX;
        self.max_ns = 0;
        self.sum_ns = 0;
        self.over_budget = 0;
    }

    fn sorted_samples(&self) -> Option<Vec<u64>> {
        if self.sample_count == 0 {
            return None;
        }
        let mut sorted = self.samples[..self.sample_count].to_vec();
        sorted.sort_unstable();
        Some(sorted)
    }
}

/// Immutable summary of latency metrics for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LatencySnapshot {
    /// Total samples recorded.
    pub total: u64,
    /// Minimum latency in nanoseconds.
    pub min_ns: Option<u64>,
    /// Maximum latency in nanoseconds.
    pub max_ns: Option<u64>,
    /// Mean latency in nanoseconds.
    pub mean_ns: Option<u64>,
    /// Samples above the budget.
    pub over_budget: u64,
    /// Samples currently retained.
    pub sample_count: usize,
}

impl LatencySnapshot {
    /// Jitter (max - min) in nanoseconds.
    #[must_use]
    pub fn jitter_ns(&self) -> Option<u64> {
        match (self.min_ns, self.max_ns) {
            (Some(min), Some(max)) => Some(max - min),
            _ => None,
        }
    }
}

fn valid_percentile(p: f64) -> bool {
    (0.0..=100.0).contains(&p)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn rank(percentile: f64, len: usize) -> usize {
    let idx = ((percentile / 100.0) * (len - 1) as f64).round() as usize;
    idx.min(len - 1)
}

fn duration_ns(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_recording() {
        let mut metrics = LatencyMetrics::new(100, Duration::from_millis(20));

        metrics.record(Duration::from_millis(15));
        metrics.record(Duration::from_millis(30));
        metrics.record(Duration::from_millis(16));

        assert_eq!(metrics.total(), 3);
        assert_eq!(metrics.min(), Some(Duration::from_millis(15)));
        assert_eq!(metrics.max(), Some(Duration::from_millis(30)));
        assert_eq!(metrics.over_budget(), 1);
    }

    #[test]
    fn test_empty_metrics() {
        let metrics = LatencyMetrics::new(8, Duration::from_millis(1));
        assert!(metrics.min().is_none());
        assert!(metrics.mean().is_none());
        assert!(metrics.percentile(50.0).is_none());
        assert!(metrics.percentiles(&[50.0, 99.0]).is_empty());
        assert_eq!(metrics.snapshot().jitter_ns(), None);
    }

    #[test]
    fn test_percentile_calculation() {
        let mut metrics = LatencyMetrics::new(100, Duration::from_secs(1));
        for i in 1..=100 {
            metrics.record(Duration::from_micros(i));
        }

        let p50 = metrics.percentile(50.0).unwrap();
        assert!(p50.as_micros() >= 49 && p50.as_micros() <= 51);

        let p99 = metrics.percentile(99.0).unwrap();
        assert!(p99.as_micros() >= 98 && p99.as_micros() <= 100);

        assert!(metrics.percentile(-1.0).is_none());
        assert!(metrics.percentile(f64::NAN).is_none());
        let results = metrics.percentiles(&[-10.0, 50.0, 150.0, 99.0, f64::NAN]);
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_ring_buffer_wrapping() {
        let mut metrics = LatencyMetrics::new(10, Duration::from_secs(1));
        for i in 0..25 {
            metrics.record_ns(i * 1000);
        }

        assert_eq!(metrics.total(), 25);
        assert_eq!(metrics.snapshot().sample_count, 10);
        // Only the last ten samples (15..25 us) remain.
        assert_eq!(metrics.percentile(0.0), Some(Duration::from_micros(15)));
    }

    #[test]
    fn test_snapshot_and_reset() {
        let mut metrics = LatencyMetrics::new(100, Duration::from_millis(1));
        metrics.record(Duration::from_micros(400));
        metrics.record(Duration::from_micros(600));

        let snap = metrics.snapshot();
        assert_eq!(snap.total, 2);
        assert_eq!(snap.mean_ns, Some(500_000));
        assert_eq!(snap.jitter_ns(), Some(200_000));

        metrics.reset();
        assert_eq!(metrics.total(), 0);
        assert!(metrics.max().is_none());
    }
}
