//! Error types for CLI operations.

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Replay input line could not be read as an event
    #[error("Invalid event on line {line}: {message}")]
    InvalidEvent { line: usize, message: String },

    /// Dispatch loop stopped responding
    #[error("Dispatch loop failed: {message}")]
    DispatchLoop { message: String },
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn invalid_event(line: usize, message: impl Into<String>) -> Self {
        Self::InvalidEvent {
            line,
            message: message.into(),
        }
    }

    pub fn dispatch_loop(message: impl Into<String>) -> Self {
        Self::DispatchLoop {
            message: message.into(),
        }
    }
}

impl From<dispatcher::DispatcherError> for CliError {
    fn from(e: dispatcher::DispatcherError) -> Self {
        Self::dispatch_loop(e.to_string())
    }
}
