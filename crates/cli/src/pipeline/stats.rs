//! Replay statistics.

use std::time::Duration;

use dispatcher::DispatchStats;
use observability::DispatchMetricsAggregator;

/// Statistics from a replay run
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Lines read from the input
    pub lines_read: u64,

    /// Lines skipped because they were not valid events
    pub invalid_lines: u64,

    /// Total duration of the run
    pub duration: Duration,

    /// Whether every queue drained before the timeout
    pub drained: bool,

    /// Final per-processor state reported by the loop
    pub dispatch: Option<DispatchStats>,

    /// Track outcome totals
    pub metrics: DispatchMetricsAggregator,
}

impl PipelineStats {
    /// Tracked events per second
    pub fn events_per_sec(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.metrics.tracked as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\nReplay Statistics");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Lines read: {}", self.lines_read);
        println!("   ├─ Invalid lines: {}", self.invalid_lines);
        println!("   ├─ Events/s: {:.2}", self.events_per_sec());
        println!("   └─ Drained: {}", if self.drained { "yes" } else { "no" });

        println!("\n{}", self.metrics.summary());

        if let Some(dispatch) = &self.dispatch {
            println!("Processors");
            for processor in &dispatch.processors {
                println!(
                    "   - {}: delivered={} failed={} rejected={} queued={} inflight={}{}",
                    processor.id,
                    processor.metrics.delivered_count,
                    processor.metrics.failure_count,
                    processor.metrics.rejected_count,
                    processor.queue_size,
                    processor.inflight,
                    if processor.gate_open { "" } else { " [gated]" }
                );
            }
            if dispatch.consent_queue > 0 {
                println!("   - awaiting consent: {}", dispatch.consent_queue);
            }
        }

        println!();
    }
}
