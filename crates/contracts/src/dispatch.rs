//! Dispatch - the unit of telemetry moving through the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event payload: a JSON object with arbitrarily nested values.
pub type DataObject = Map<String, Value>;

/// A tracked event.
///
/// Stages never edit a dispatch in place; they derive a new one with
/// [`Dispatch::with_payload`], keeping id, name and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispatch {
    /// Unique identifier (uuid v4)
    pub id: String,

    /// Event name
    pub name: String,

    /// Creation time
    pub timestamp: DateTime<Utc>,

    /// Event data
    #[serde(default)]
    pub payload: DataObject,
}

impl Dispatch {
    /// Create a dispatch with a fresh id, stamped now.
    pub fn new(name: impl Into<String>, payload: DataObject) -> Self {
        Self::with_timestamp(name, payload, Utc::now())
    }

    /// Create a dispatch with a fresh id and an explicit creation time.
    pub fn with_timestamp(
        name: impl Into<String>,
        payload: DataObject,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            timestamp,
            payload,
        }
    }

    /// Derive a dispatch carrying `payload` in place of the current one.
    pub fn with_payload(&self, payload: DataObject) -> Self {
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            timestamp: self.timestamp,
            payload,
        }
    }
}

/// Stringify a scalar for string comparisons.
///
/// Strings are returned as-is, numbers and booleans in their JSON text
/// form. Arrays of scalars are joined with `,`. Objects, arrays holding
/// objects and null return `None`.
pub fn stringify_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Array(_) | Value::Object(_) => None,
                Value::Null => Some(String::new()),
                other => stringify_value(other),
            })
            .collect::<Option<Vec<_>>>()
            .map(|parts| parts.join(",")),
        Value::Null | Value::Object(_) => None,
    }
}

/// Whether a value is an object or an array containing one.
pub fn contains_object(value: &Value) -> bool {
    match value {
        Value::Object(_) => true,
        Value::Array(items) => items.iter().any(contains_object),
        _ => false,
    }
}

/// Short type name used in diagnostics.
pub fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
