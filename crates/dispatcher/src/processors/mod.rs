//! Built-in processor implementations
//!
//! Contains LogProcessor and FileProcessor, plus the factory that spawns
//! them from [`ProcessorSettings`].

mod file;
mod log;

pub use self::file::{FileProcessor, FileProcessorConfig};
pub use self::log::LogProcessor;

use contracts::{ProcessorSettings, ProcessorType};
use tokio::sync::mpsc;
use tracing::instrument;

use crate::error::DispatcherError;
use crate::handle::{DeliveryReport, ProcessorHandle, ProcessorOptions};

/// Spawn the worker for a configured built-in processor.
///
/// `external` entries are registered programmatically and yield `None`.
#[instrument(
    name = "dispatcher_create_processor_handle",
    skip(settings, reports),
    fields(processor = %settings.id, processor_type = ?settings.processor_type)
)]
pub fn create_processor_handle(
    settings: &ProcessorSettings,
    reports: mpsc::UnboundedSender<DeliveryReport>,
) -> Result<Option<ProcessorHandle>, DispatcherError> {
    let options = ProcessorOptions::from(settings);
    match settings.processor_type {
        ProcessorType::Log => {
            let processor = LogProcessor::new(settings.id.as_str());
            Ok(Some(ProcessorHandle::spawn(processor, options, reports)))
        }
        ProcessorType::File => {
            let processor = FileProcessor::from_params(settings.id.as_str(), &settings.params)
                .map_err(|e| DispatcherError::processor_creation(settings.id.as_str(), e.to_string()))?;
            Ok(Some(ProcessorHandle::spawn(processor, options, reports)))
        }
        ProcessorType::External => Ok(None),
    }
}
