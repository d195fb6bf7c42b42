//! Outcome of tracking one dispatch

use contracts::{Dispatch, ProcessorId};
use serde::Serialize;

/// Why a destination did not receive a dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    LoadRules,
    Consent,
    Transformation,
    Storage,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoadRules => "load_rules",
            Self::Consent => "consent",
            Self::Transformation => "transformation",
            Self::Storage => "storage",
        }
    }
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackOutcome {
    /// Stored for at least one destination, or parked until consent is decided
    Accepted { postponed: bool },
    Dropped,
}

impl TrackOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accepted { postponed: false } => "accepted",
            Self::Accepted { postponed: true } => "postponed",
            Self::Dropped => "dropped",
        }
    }

    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Completion of a `track` call.
///
/// `dispatch` is the event after the global transformations, or the
/// caller's original when it was dropped before them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackResult {
    pub dispatch: Dispatch,
    pub outcome: TrackOutcome,
    pub accepted_by: Vec<ProcessorId>,
    pub dropped_by: Vec<(ProcessorId, DropReason)>,
}

impl TrackResult {
    pub(crate) fn dropped(dispatch: Dispatch) -> Self {
        Self {
            dispatch,
            outcome: TrackOutcome::Dropped,
            accepted_by: Vec::new(),
            dropped_by: Vec::new(),
        }
    }

    pub(crate) fn postponed(dispatch: Dispatch) -> Self {
        Self {
            dispatch,
            outcome: TrackOutcome::Accepted { postponed: true },
            accepted_by: Vec::new(),
            dropped_by: Vec::new(),
        }
    }

    /// Reason `processor` was excluded, if it was
    pub fn drop_reason(&self, processor: &str) -> Option<DropReason> {
        self.dropped_by
            .iter()
            .find(|(id, _)| id == processor)
            .map(|(_, reason)| *reason)
    }
}
