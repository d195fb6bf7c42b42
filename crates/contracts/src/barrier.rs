//! Barrier contract - independently owned delivery gates.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::ProcessorId;

/// Open/closed state of a barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrierState {
    Open,
    Closed,
}

/// Observable status of a barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BarrierStatus {
    /// Current gate state
    pub state: BarrierState,
    /// Whether a flush may temporarily ignore this barrier while closed
    pub flushable: bool,
}

impl BarrierStatus {
    /// Open status
    pub const fn open(flushable: bool) -> Self {
        Self {
            state: BarrierState::Open,
            flushable,
        }
    }

    /// Closed status
    pub const fn closed(flushable: bool) -> Self {
        Self {
            state: BarrierState::Closed,
            flushable,
        }
    }

    /// Whether the barrier lets dispatches through
    pub fn is_open(&self) -> bool {
        self.state == BarrierState::Open
    }
}

/// A named gate that may block delivery to one or more processors.
///
/// Status changes are observed through a `watch` receiver; observers never
/// consume or reset the barrier's state.
pub trait Barrier: Send + Sync {
    /// Barrier id referenced by [`BarrierSettings::barrier_id`]
    fn id(&self) -> &str;

    /// Current status plus future changes
    fn status(&self) -> watch::Receiver<BarrierStatus>;
}

/// Which processors a barrier gates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub enum BarrierScope {
    /// Every processor
    All,
    /// Only the listed processors
    Processors(Vec<ProcessorId>),
}

impl BarrierScope {
    /// Whether the scope covers `processor`
    pub fn includes(&self, processor: &str) -> bool {
        match self {
            Self::All => true,
            Self::Processors(ids) => ids.iter().any(|id| id == processor),
        }
    }
}

impl From<Vec<String>> for BarrierScope {
    fn from(values: Vec<String>) -> Self {
        if values.iter().any(|v| v == "all") {
            Self::All
        } else {
            Self::Processors(values.into_iter().map(ProcessorId::from).collect())
        }
    }
}

impl From<BarrierScope> for Vec<String> {
    fn from(scope: BarrierScope) -> Self {
        match scope {
            BarrierScope::All => vec!["all".to_string()],
            BarrierScope::Processors(ids) => ids.into_iter().map(|id| id.to_string()).collect(),
        }
    }
}

/// Scoping of one barrier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarrierSettings {
    /// Id of a registered barrier
    pub barrier_id: String,
    /// Processors it gates
    pub scopes: BarrierScope,
}

impl BarrierSettings {
    /// Scope `barrier_id` over `scopes`
    pub fn new(barrier_id: impl Into<String>, scopes: BarrierScope) -> Self {
        Self {
            barrier_id: barrier_id.into(),
            scopes,
        }
    }
}
