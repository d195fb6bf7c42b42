//! Replay orchestrator - feeds recorded events through a dispatch loop.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use barriers::ManualBarrier;
use contracts::{BarrierStatus, CoreSettings, DataObject, Dispatch};
use dispatcher::{DispatchHandle, DispatchLoopBuilder, DispatchStats};
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::PipelineStats;
use crate::error::CliError;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// One recorded event
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayEvent {
    pub name: String,
    #[serde(default)]
    pub data: DataObject,
}

impl ReplayEvent {
    /// Parse one input line; blank lines yield `None`
    pub fn parse(line_no: usize, line: &str) -> Result<Option<Self>, CliError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        serde_json::from_str(line)
            .map(Some)
            .map_err(|e| CliError::invalid_event(line_no, e.to_string()))
    }
}

/// Replay configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub settings: CoreSettings,

    /// Flush gated queues once input is exhausted
    pub flush: bool,

    /// Barrier ids that start closed
    pub closed_barriers: HashSet<String>,

    /// Drain wait limit (None = wait indefinitely)
    pub drain_timeout: Option<Duration>,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

/// Replay pipeline
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Replay every event from `input`, then wait for delivery
    pub async fn run<R>(self, input: R) -> Result<PipelineStats>
    where
        R: AsyncBufRead + Unpin,
    {
        let start_time = Instant::now();

        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        let (_settings_tx, settings_rx) = watch::channel(self.config.settings.clone());
        let mut builder = DispatchLoopBuilder::new(settings_rx);
        for barrier in &self.config.settings.barriers {
            let closed = self.config.closed_barriers.contains(&barrier.barrier_id);
            let status = if closed {
                BarrierStatus::closed(true)
            } else {
                BarrierStatus::open(true)
            };
            info!(barrier = %barrier.barrier_id, closed, "Registering manual barrier");
            builder = builder.barrier(Arc::new(ManualBarrier::new(
                barrier.barrier_id.clone(),
                status,
            )));
        }

        let (handle, task) = builder.spawn();
        info!(
            processors = self.config.settings.processors.len(),
            barriers = self.config.settings.barriers.len(),
            "Dispatch loop started"
        );

        let mut stats = PipelineStats::default();
        replay_lines(&handle, input, &mut stats).await?;

        if self.config.flush {
            info!("Flushing gated queues");
            handle.flush().map_err(CliError::from)?;
        }

        let (drained, final_stats) = wait_for_drain(&handle, self.config.drain_timeout).await?;
        if !drained {
            warn!("Queues did not drain before the timeout");
        }
        stats.drained = drained;
        stats.dispatch = Some(final_stats);

        info!("Shutting down dispatch loop...");
        handle.shutdown().await.map_err(CliError::from)?;
        drop(handle);
        task.await.context("Dispatch loop task panicked")?;

        stats.duration = start_time.elapsed();
        info!(
            duration_secs = stats.duration.as_secs_f64(),
            tracked = stats.metrics.tracked,
            "Replay complete"
        );
        Ok(stats)
    }
}

async fn replay_lines<R>(
    handle: &DispatchHandle,
    input: R,
    stats: &mut PipelineStats,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await.context("Failed to read input")? {
        line_no += 1;
        stats.lines_read += 1;

        let event = match ReplayEvent::parse(line_no, &line) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "Skipping line");
                stats.invalid_lines += 1;
                continue;
            }
        };

        let started = Instant::now();
        let result = handle
            .track(Dispatch::new(event.name, event.data))
            .await
            .map_err(CliError::from)?;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        debug!(
            dispatch_id = %result.dispatch.id,
            outcome = result.outcome.as_str(),
            accepted_by = result.accepted_by.len(),
            "Event tracked"
        );
        stats
            .metrics
            .record_outcome(result.outcome.as_str(), latency_ms);
        for (processor, reason) in &result.dropped_by {
            stats.metrics.record_drop(processor.as_str(), reason.as_str());
        }
    }
    Ok(())
}

/// Poll loop stats until nothing is queued or in a worker
async fn wait_for_drain(
    handle: &DispatchHandle,
    timeout: Option<Duration>,
) -> Result<(bool, DispatchStats)> {
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        let stats = handle.stats().await.map_err(CliError::from)?;
        if stats.is_drained() {
            return Ok((true, stats));
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Ok((false, stats));
        }
        tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
    }
}
