//! ProcessorHandle - runs a processor on its own worker task

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument};

use contracts::{Dispatch, DispatchProcessor, ProcessorId, ProcessorSettings};

use crate::metrics::ProcessorMetrics;

/// Worker sizing for a processor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorOptions {
    /// Batches buffered between the loop and the worker
    pub queue_capacity: usize,
    /// Upper bound on dispatches per `deliver` call
    pub dispatch_limit: Option<usize>,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            dispatch_limit: None,
        }
    }
}

impl From<&ProcessorSettings> for ProcessorOptions {
    fn from(settings: &ProcessorSettings) -> Self {
        Self {
            queue_capacity: settings.queue_capacity.max(1),
            dispatch_limit: settings.dispatch_limit,
        }
    }
}

/// Result of one `deliver` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed(String),
}

/// Sent back to the processing loop after every batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub processor_id: ProcessorId,
    pub dispatch_ids: Vec<String>,
    pub outcome: DeliveryOutcome,
}

/// A batch the worker could not take, handed back to the caller
#[derive(Debug)]
pub enum DeliverError {
    /// Worker queue is full; retry once it reports progress
    Busy(Vec<Dispatch>),
    /// Worker task is gone
    Closed(Vec<Dispatch>),
}

/// Handle to a running processor worker
pub struct ProcessorHandle {
    id: ProcessorId,
    options: ProcessorOptions,
    /// Channel to send batches to the worker
    tx: mpsc::Sender<Vec<Dispatch>>,
    metrics: Arc<ProcessorMetrics>,
    worker_handle: JoinHandle<()>,
}

impl ProcessorHandle {
    /// Spawn the worker; reports go to `reports`
    pub fn spawn<P>(
        processor: P,
        options: ProcessorOptions,
        reports: mpsc::UnboundedSender<DeliveryReport>,
    ) -> Self
    where
        P: DispatchProcessor + 'static,
    {
        let id = ProcessorId::from(processor.id());
        let (tx, rx) = mpsc::channel(options.queue_capacity.max(1));
        let metrics = Arc::new(ProcessorMetrics::new());

        let worker_metrics = Arc::clone(&metrics);
        let worker_id = id.clone();
        let worker_handle = tokio::spawn(async move {
            processor_worker(processor, rx, reports, worker_metrics, worker_id).await;
        });

        Self {
            id,
            options,
            tx,
            metrics,
            worker_handle,
        }
    }

    pub fn id(&self) -> &ProcessorId {
        &self.id
    }

    pub fn options(&self) -> ProcessorOptions {
        self.options
    }

    pub fn metrics(&self) -> &Arc<ProcessorMetrics> {
        &self.metrics
    }

    /// Batches the worker queue can take right now
    pub fn free_slots(&self) -> usize {
        self.tx.capacity()
    }

    /// Hand a batch to the worker without waiting.
    ///
    /// Returns the batch back if the worker cannot take it.
    pub fn try_deliver(&self, batch: Vec<Dispatch>) -> Result<(), DeliverError> {
        match self.tx.try_send(batch) {
            Ok(()) => {
                self.metrics
                    .set_pending_batches(self.tx.max_capacity() - self.tx.capacity());
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(batch)) => {
                self.metrics.inc_rejected_count();
                debug!(
                    processor = %self.id,
                    dispatches = batch.len(),
                    "Worker queue full, batch handed back"
                );
                Err(DeliverError::Busy(batch))
            }
            Err(mpsc::error::TrySendError::Closed(batch)) => {
                self.metrics.inc_rejected_count();
                error!(processor = %self.id, "Processor worker closed unexpectedly");
                Err(DeliverError::Closed(batch))
            }
        }
    }

    /// Stop accepting batches and wait for the worker to finish the ones
    /// already handed over
    #[instrument(name = "processor_handle_shutdown", skip(self), fields(processor = %self.id))]
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker_handle.await {
            error!(processor = %self.id, error = ?e, "Worker task panicked");
        }
        debug!(processor = %self.id, "ProcessorHandle shutdown complete");
    }
}

impl std::fmt::Debug for ProcessorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorHandle")
            .field("id", &self.id)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[instrument(
    name = "processor_worker_loop",
    skip(processor, rx, reports, metrics),
    fields(processor = %id)
)]
async fn processor_worker<P: DispatchProcessor>(
    mut processor: P,
    mut rx: mpsc::Receiver<Vec<Dispatch>>,
    reports: mpsc::UnboundedSender<DeliveryReport>,
    metrics: Arc<ProcessorMetrics>,
    id: ProcessorId,
) {
    debug!("Processor worker started");

    while let Some(batch) = rx.recv().await {
        metrics.set_pending_batches(rx.len());
        metrics.inc_batch_count();
        observability::record_batch(&id, batch.len());

        let started = Instant::now();
        let outcome = match processor.deliver(&batch).await {
            Ok(()) => {
                metrics.add_delivered(batch.len());
                DeliveryOutcome::Delivered
            }
            Err(e) => {
                metrics.add_failures(batch.len());
                error!(dispatches = batch.len(), error = %e, "Delivery failed");
                DeliveryOutcome::Failed(e.to_string())
            }
        };
        observability::record_delivery_latency_ms(&id, started.elapsed().as_secs_f64() * 1000.0);

        let report = DeliveryReport {
            processor_id: id.clone(),
            dispatch_ids: batch.into_iter().map(|d| d.id).collect(),
            outcome,
        };
        if reports.send(report).is_err() {
            debug!("Dispatch loop gone, report discarded");
        }
    }

    if let Err(e) = processor.close().await {
        error!(error = %e, "Close failed on shutdown");
    }
    debug!("Processor worker stopped");
}
