//! Consent contract - decision state supplied by an optional consent provider.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tokio::sync::watch;

use crate::ProcessorId;

/// How the current decision was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    /// Assumed (e.g. opt-out regimes); may still change
    Implicit,
    /// Given by the user
    Explicit,
}

impl DecisionType {
    /// Value written to the `consent_type` payload key
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Implicit => "implicit",
            Self::Explicit => "explicit",
        }
    }
}

/// A consent decision: the purposes the user agreed to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentDecision {
    pub decision_type: DecisionType,
    pub purposes: BTreeSet<String>,
}

impl ConsentDecision {
    /// Decision granting `purposes`
    pub fn new<I, S>(decision_type: DecisionType, purposes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            decision_type,
            purposes: purposes.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `purpose` was granted
    pub fn allows(&self, purpose: &str) -> bool {
        self.purposes.contains(purpose)
    }
}

/// Source of consent decisions.
pub trait ConsentProvider: Send + Sync {
    /// Current decision (`None` while undecided) plus future changes
    fn decision(&self) -> watch::Receiver<Option<ConsentDecision>>;
}

/// Consent configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentSettings {
    /// Purpose that must be granted for any event to leave the device
    #[serde(default = "default_internal_purpose")]
    pub tealium_purpose_id: String,

    /// Purpose -> processors requiring it
    #[serde(default)]
    pub purposes: Vec<ConsentPurpose>,
}

impl Default for ConsentSettings {
    fn default() -> Self {
        Self {
            tealium_purpose_id: default_internal_purpose(),
            purposes: Vec::new(),
        }
    }
}

fn default_internal_purpose() -> String {
    "tealium".to_string()
}

/// Processors gated by a purpose
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentPurpose {
    pub purpose_id: String,
    pub processor_ids: Vec<ProcessorId>,
}

impl ConsentSettings {
    /// Purposes a processor depends on
    pub fn required_purposes<'a>(&'a self, processor: &'a str) -> impl Iterator<Item = &'a str> {
        self.purposes
            .iter()
            .filter(move |p| p.processor_ids.iter().any(|id| id == processor))
            .map(|p| p.purpose_id.as_str())
    }
}
