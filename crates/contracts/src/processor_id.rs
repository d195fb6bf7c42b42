//! ProcessorId - destination identifier shared across queues and gates

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Queue name used to park dispatches while consent is undecided.
///
/// Never registered as a processor and never purged by destination
/// reconciliation.
pub const CONSENT_QUEUE_ID: &str = "__consent__";

/// Destination (processor) identifier.
///
/// # Examples
/// ```
/// use contracts::ProcessorId;
///
/// let id: ProcessorId = "collect".into();
/// assert_eq!(id, "collect");
/// assert!(!id.is_reserved());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessorId(Arc<str>);

impl ProcessorId {
    pub fn new(s: &str) -> Self {
        Self(Arc::from(s))
    }

    /// The reserved consent parking queue
    pub fn consent_queue() -> Self {
        Self::new(CONSENT_QUEUE_ID)
    }

    /// Whether this id names an internal queue rather than a processor
    pub fn is_reserved(&self) -> bool {
        self.as_str() == CONSENT_QUEUE_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for ProcessorId {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ProcessorId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Derived Hash matches str, so maps keyed by id can be queried with &str.
impl Borrow<str> for ProcessorId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProcessorId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ProcessorId {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl fmt::Display for ProcessorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for ProcessorId {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for ProcessorId {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl Serialize for ProcessorId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ProcessorId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Self::from)
    }
}
