//! MappingEngine - reshapes a dispatch payload for one processor.

use contracts::{stringify_value, DataObject, Dispatch, MappingOperation};
use serde_json::Value;
use tracing::trace;

/// Applies an ordered list of [`MappingOperation`]s.
///
/// The output payload starts empty: keys not written by any operation are
/// dropped. A later write to an already-written destination replaces it
/// when the operation copies a reference and appends when it carries a
/// constant.
#[derive(Debug, Default, Clone, Copy)]
pub struct MappingEngine;

impl MappingEngine {
    pub fn new() -> Self {
        Self
    }

    /// Map `dispatch` into a new dispatch with the same id, name and timestamp
    pub fn apply(&self, operations: &[MappingOperation], dispatch: &Dispatch) -> Dispatch {
        let mut output = DataObject::new();
        for operation in operations {
            apply_operation(operation, &dispatch.payload, &mut output);
        }
        trace!(
            dispatch_id = %dispatch.id,
            operations = operations.len(),
            keys = output.len(),
            "Mappings applied"
        );
        dispatch.with_payload(output)
    }
}

fn apply_operation(operation: &MappingOperation, input: &DataObject, output: &mut DataObject) {
    let source = operation
        .reference
        .as_ref()
        .and_then(|reference| reference.resolve(input));

    if let Some(filter) = &operation.filter {
        let matched = source
            .and_then(stringify_value)
            .is_some_and(|text| text == *filter);
        if !matched {
            return;
        }
    }

    let (value, append) = match (&operation.map_to, source) {
        (Some(constant), _) => (constant.clone(), true),
        (None, Some(source)) => (source.clone(), false),
        (None, None) => return,
    };

    match operation.destination.resolve_mut(output) {
        Some(existing) if append => append_value(existing, value),
        Some(existing) => *existing = value,
        None => operation.destination.insert(output, value),
    }
}

fn append_value(existing: &mut Value, value: Value) {
    match (existing, value) {
        (Value::Array(items), Value::Array(more)) => items.extend(more),
        (Value::Array(items), value) => items.push(value),
        (existing, Value::Array(more)) => {
            let mut items = vec![existing.take()];
            items.extend(more);
            *existing = Value::Array(items);
        }
        (existing, value) => {
            *existing = Value::Array(vec![existing.take(), value]);
        }
    }
}
