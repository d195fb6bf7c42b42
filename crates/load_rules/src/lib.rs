//! # Load Rules
//!
//! Boolean rule trees over payload conditions, deciding which processors
//! receive a dispatch.
//!
//! - [`Evaluate`] evaluates a [`contracts::Condition`] or a `Rule<Condition>` against a
//!   payload, raising [`RuleError`] on malformed input.
//! - [`LoadRuleEngine`] expands each processor's `Rule<String>` over the rule
//!   table and answers [`LoadRuleEngine::rules_allow`].

mod condition;
mod engine;
mod error;
mod tree;

pub use engine::LoadRuleEngine;
pub use error::{NumberSide, RuleError};
pub use tree::{evaluate_with, expand};

use contracts::DataObject;

/// Evaluation of a condition or rule tree against a payload.
pub trait Evaluate {
    /// Evaluate, surfacing typed errors
    fn evaluate(&self, payload: &DataObject) -> Result<bool, RuleError>;

    /// Evaluate, treating any error as "no match"
    fn matches(&self, payload: &DataObject) -> bool {
        self.evaluate(payload).unwrap_or(false)
    }
}
