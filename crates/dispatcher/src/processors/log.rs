//! LogProcessor - logs a dispatch summary via tracing

use contracts::{ContractError, Dispatch, DispatchProcessor};
use tracing::{info, instrument};

/// Processor that logs each dispatch, for debugging and dry runs
pub struct LogProcessor {
    id: String,
    delivered: u64,
}

impl LogProcessor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            delivered: 0,
        }
    }

    /// Dispatches logged so far
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    fn log_dispatch_summary(&self, dispatch: &Dispatch) {
        info!(
            processor = %self.id,
            dispatch_id = %dispatch.id,
            event = %dispatch.name,
            timestamp = %dispatch.timestamp,
            keys = dispatch.payload.len(),
            "Dispatch delivered"
        );
    }
}

impl DispatchProcessor for LogProcessor {
    fn id(&self) -> &str {
        &self.id
    }

    #[instrument(
        name = "log_processor_deliver",
        skip(self, dispatches),
        fields(processor = %self.id, count = dispatches.len())
    )]
    async fn deliver(&mut self, dispatches: &[Dispatch]) -> Result<(), ContractError> {
        for dispatch in dispatches {
            self.log_dispatch_summary(dispatch);
        }
        self.delivered += dispatches.len() as u64;
        Ok(())
    }

    #[instrument(name = "log_processor_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        info!(processor = %self.id, delivered = self.delivered, "LogProcessor closed");
        Ok(())
    }
}
