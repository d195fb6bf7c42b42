//! Mapping operation data model.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::VariableAccessor;

/// One field transformation applied by the mapping engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingOperation {
    /// Where the value lands in the output payload
    pub destination: VariableAccessor,

    /// Source variable in the input payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<VariableAccessor>,

    /// Apply only when the source stringifies to this value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    /// Constant written instead of the source value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_to: Option<Value>,
}

impl MappingOperation {
    /// Copy `reference` into `destination`.
    pub fn from_reference(
        reference: impl Into<VariableAccessor>,
        destination: impl Into<VariableAccessor>,
    ) -> Self {
        Self {
            destination: destination.into(),
            reference: Some(reference.into()),
            filter: None,
            map_to: None,
        }
    }

    /// Write a constant into `destination`.
    pub fn constant(value: impl Into<Value>, destination: impl Into<VariableAccessor>) -> Self {
        Self {
            destination: destination.into(),
            reference: None,
            filter: None,
            map_to: Some(value.into()),
        }
    }

    /// Restrict the operation to source values equal to `filter`.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Read `reference` (used with a filter and/or constant).
    pub fn with_reference(mut self, reference: impl Into<VariableAccessor>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}
