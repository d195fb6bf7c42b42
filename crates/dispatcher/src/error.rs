//! Dispatcher error types

use thiserror::Error;

/// Dispatcher-specific errors
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Built-in processor could not be created from settings
    #[error("failed to create processor '{processor}': {message}")]
    ProcessorCreation { processor: String, message: String },

    /// The processing loop has stopped
    #[error("dispatch loop is closed")]
    LoopClosed,

    /// Queue failure surfaced to a caller
    #[error("queue error: {0}")]
    Queue(#[from] queue_manager::QueueError),

    /// Processor failure (from contract)
    #[error("processor error: {0}")]
    Contract(#[from] contracts::ContractError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatcherError {
    /// Create a processor creation error
    pub fn processor_creation(processor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProcessorCreation {
            processor: processor.into(),
            message: message.into(),
        }
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for DispatcherError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Self::LoopClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for DispatcherError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Self::LoopClosed
    }
}
