//! Queue error types

use thiserror::Error;

/// Queue Manager / store errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Underlying store failed for a destination
    #[error("store failure for '{destination}': {message}")]
    Store {
        destination: String,
        message: String,
    },
}

impl QueueError {
    /// Create store error
    pub fn store(destination: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store {
            destination: destination.into(),
            message: message.into(),
        }
    }

    /// Destination the failure belongs to
    pub fn destination(&self) -> &str {
        match self {
            Self::Store { destination, .. } => destination,
        }
    }
}
