//! Dispatch routing metrics
//!
//! Thin helpers over the `metrics` facade (exported to Prometheus when a
//! recorder is installed) plus an in-memory aggregator for run summaries.

use metrics::{counter, gauge, histogram};
use std::collections::BTreeMap;

/// Record the final outcome of a tracked dispatch
///
/// `outcome` is one of `accepted`, `postponed`, `dropped`.
pub fn record_track_outcome(outcome: &str) {
    counter!("dispatch_router_tracked_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record a processor excluded from a dispatch
pub fn record_processor_drop(processor: &str, reason: &str) {
    counter!(
        "dispatch_router_dropped_total",
        "processor" => processor.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record a delivery report
pub fn record_delivery(processor: &str, dispatches: usize, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "dispatch_router_delivered_total",
        "processor" => processor.to_string(),
        "status" => status
    )
    .increment(dispatches as u64);
}

/// Record a batch handed to a processor worker
pub fn record_batch(processor: &str, size: usize) {
    histogram!("dispatch_router_batch_size", "processor" => processor.to_string())
        .record(size as f64);
}

/// Record time spent inside a processor's `deliver`
pub fn record_delivery_latency_ms(processor: &str, latency_ms: f64) {
    histogram!(
        "dispatch_router_delivery_latency_ms",
        "processor" => processor.to_string()
    )
    .record(latency_ms);
}

/// Record a processor gate flip
pub fn record_gate(processor: &str, open: bool) {
    gauge!("dispatch_router_gate_open", "processor" => processor.to_string())
        .set(if open { 1.0 } else { 0.0 });
}

/// In-memory totals for a run, printed by the CLI
#[derive(Debug, Clone, Default)]
pub struct DispatchMetricsAggregator {
    pub tracked: u64,
    pub accepted: u64,
    pub postponed: u64,
    pub dropped: u64,
    /// Processor -> reason -> count
    pub drops_by_processor: BTreeMap<String, BTreeMap<String, u64>>,
    /// Track round-trip latency
    pub track_latency_ms: RunningStats,
}

impl DispatchMetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one tracked dispatch
    pub fn record_outcome(&mut self, outcome: &str, latency_ms: f64) {
        self.tracked += 1;
        match outcome {
            "accepted" => self.accepted += 1,
            "postponed" => self.postponed += 1,
            _ => self.dropped += 1,
        }
        self.track_latency_ms.push(latency_ms);
    }

    /// Count one processor exclusion
    pub fn record_drop(&mut self, processor: &str, reason: &str) {
        *self
            .drops_by_processor
            .entry(processor.to_string())
            .or_default()
            .entry(reason.to_string())
            .or_insert(0) += 1;
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            tracked: self.tracked,
            accepted: self.accepted,
            postponed: self.postponed,
            dropped: self.dropped,
            drop_rate: if self.tracked > 0 {
                self.dropped as f64 / self.tracked as f64 * 100.0
            } else {
                0.0
            },
            drops_by_processor: self.drops_by_processor.clone(),
            track_latency_ms: StatsSummary::from(&self.track_latency_ms),
        }
    }
}

/// Snapshot of [`DispatchMetricsAggregator`]
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub tracked: u64,
    pub accepted: u64,
    pub postponed: u64,
    pub dropped: u64,
    pub drop_rate: f64,
    pub drops_by_processor: BTreeMap<String, BTreeMap<String, u64>>,
    pub track_latency_ms: StatsSummary,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Dispatch Summary ===")?;
        writeln!(f, "Tracked: {}", self.tracked)?;
        writeln!(f, "Accepted: {}", self.accepted)?;
        writeln!(f, "Postponed: {}", self.postponed)?;
        writeln!(f, "Dropped: {} ({:.2}%)", self.dropped, self.drop_rate)?;
        writeln!(f, "Track latency (ms): {}", self.track_latency_ms)?;

        if !self.drops_by_processor.is_empty() {
            writeln!(f, "Exclusions:")?;
            for (processor, reasons) in &self.drops_by_processor {
                for (reason, count) in reasons {
                    writeln!(f, "  {processor} [{reason}]: {count}")?;
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            return write!(f, "N/A");
        }
        write!(
            f,
            "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
            self.min, self.max, self.mean, self.std_dev, self.count
        )
    }
}

/// Online mean/variance (Welford)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
            return;
        }
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_stats_matches_sample_variance() {
        let mut stats = RunningStats::default();
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            stats.push(v);
        }
        assert_eq!(stats.count(), 8);
        assert!((stats.mean() - 5.0).abs() < 1e-10);
        assert!((stats.variance() - 32.0 / 7.0).abs() < 1e-10);
    }

    #[test]
    fn aggregator_counts_outcomes_and_drops() {
        let mut aggregator = DispatchMetricsAggregator::new();
        aggregator.record_outcome("accepted", 1.0);
        aggregator.record_outcome("dropped", 3.0);
        aggregator.record_outcome("postponed", 2.0);
        aggregator.record_drop("collect", "load_rules");
        aggregator.record_drop("collect", "load_rules");

        let summary = aggregator.summary();
        assert_eq!(summary.tracked, 3);
        assert_eq!(summary.dropped, 1);
        assert!((summary.drop_rate - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(summary.drops_by_processor["collect"]["load_rules"], 2);
        assert_eq!(summary.track_latency_ms.count, 3);

        let text = summary.to_string();
        assert!(text.contains("collect [load_rules]: 2"));
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_track_outcome("accepted");
        record_processor_drop("collect", "consent");
        record_delivery("collect", 3, true);
        record_batch("collect", 3);
        record_delivery_latency_ms("collect", 0.5);
        record_gate("collect", false);
    }
}
