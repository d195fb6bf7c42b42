//! VariableAccessor - addresses a (possibly nested) key inside a payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::DataObject;

/// A payload variable, optionally nested under parent object keys.
///
/// `{"variable": "id", "path": ["order", "item"]}` addresses
/// `payload.order.item.id`. Deserializes from a bare string as well.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "AccessorRepr")]
pub struct VariableAccessor {
    /// Key read or written in the innermost object
    pub variable: String,

    /// Parent object keys, outermost first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AccessorRepr {
    Bare(String),
    Full {
        variable: String,
        #[serde(default)]
        path: Vec<String>,
    },
}

impl From<AccessorRepr> for VariableAccessor {
    fn from(repr: AccessorRepr) -> Self {
        match repr {
            AccessorRepr::Bare(variable) => Self::new(variable),
            AccessorRepr::Full { variable, path } => Self { variable, path },
        }
    }
}

impl VariableAccessor {
    /// Top-level variable
    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            path: Vec::new(),
        }
    }

    /// Nested variable under `path`
    pub fn nested<I, S>(path: I, variable: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            variable: variable.into(),
            path: path.into_iter().map(Into::into).collect(),
        }
    }

    /// Look the variable up.
    ///
    /// Returns `None` when any key is missing or a path segment is not an
    /// object. A present null is returned as `Some(Value::Null)`.
    pub fn resolve<'a>(&self, data: &'a DataObject) -> Option<&'a Value> {
        let mut current = data;
        for key in &self.path {
            current = current.get(key)?.as_object()?;
        }
        current.get(&self.variable)
    }

    /// Write `value`, creating intermediate objects as needed.
    ///
    /// Non-object intermediates are replaced by objects.
    pub fn insert(&self, data: &mut DataObject, value: Value) {
        let mut current = data;
        for key in &self.path {
            let slot = current
                .entry(key.clone())
                .or_insert_with(|| Value::Object(DataObject::new()));
            if !slot.is_object() {
                *slot = Value::Object(DataObject::new());
            }
            current = match slot {
                Value::Object(map) => map,
                _ => return,
            };
        }
        current.insert(self.variable.clone(), value);
    }

    /// Mutable lookup used when combining repeated writes.
    pub fn resolve_mut<'a>(&self, data: &'a mut DataObject) -> Option<&'a mut Value> {
        let mut current = data;
        for key in &self.path {
            current = current.get_mut(key)?.as_object_mut()?;
        }
        current.get_mut(&self.variable)
    }
}

impl From<&str> for VariableAccessor {
    fn from(variable: &str) -> Self {
        Self::new(variable)
    }
}

impl fmt::Display for VariableAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for key in &self.path {
            write!(f, "{key}.")?;
        }
        f.write_str(&self.variable)
    }
}
