//! Layered error definitions
//!
//! Categorized by source: config / processor / general

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Processor Errors =====
    /// Processor failed to deliver a batch
    #[error("processor '{processor_id}' delivery error: {message}")]
    ProcessorDelivery {
        processor_id: String,
        message: String,
    },

    /// Processor could not be closed cleanly
    #[error("processor '{processor_id}' close error: {message}")]
    ProcessorClose {
        processor_id: String,
        message: String,
    },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create processor delivery error
    pub fn processor_delivery(processor_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProcessorDelivery {
            processor_id: processor_id.into(),
            message: message.into(),
        }
    }

    /// Create processor close error
    pub fn processor_close(processor_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProcessorClose {
            processor_id: processor_id.into(),
            message: message.into(),
        }
    }
}
