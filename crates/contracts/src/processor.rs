//! DispatchProcessor trait - Dispatcher output interface
//!
//! Defines the abstract interface for destinations.

use crate::{ContractError, Dispatch};

/// Downstream consumer of dispatches.
///
/// All processor implementations must implement this trait. A processor
/// receives batches in queue order; returning `Ok` acknowledges the whole
/// batch, returning `Err` drops it.
#[trait_variant::make(DispatchProcessor: Send)]
pub trait LocalDispatchProcessor {
    /// Processor id (destination id, used for queues/logging/metrics)
    fn id(&self) -> &str;

    /// Deliver a batch
    ///
    /// # Errors
    /// Returns delivery error (should include context)
    async fn deliver(&mut self, dispatches: &[Dispatch]) -> Result<(), ContractError>;

    /// Release resources
    async fn close(&mut self) -> Result<(), ContractError>;
}
