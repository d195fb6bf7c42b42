//! LoadRuleEngine - per-processor rule gating.

use contracts::{Condition, CoreSettings, DataObject, ProcessorId, Rule};
use std::collections::HashMap;
use tracing::{debug, instrument, warn};

use crate::error::RuleError;
use crate::tree::expand;
use crate::Evaluate;

/// Holds the rule table and each processor's rule reference.
///
/// Processor rules are expanded once per update, so evaluation only walks
/// condition trees. A processor without a rule accepts everything.
#[derive(Debug, Default, Clone)]
pub struct LoadRuleEngine {
    /// Rule id -> condition tree
    rules: HashMap<String, Rule<Condition>>,
    /// Processor -> rule over rule ids
    processor_rules: HashMap<ProcessorId, Rule<String>>,
    /// Expanded processor rules (or the expansion failure)
    expanded: HashMap<ProcessorId, Result<Rule<Condition>, RuleError>>,
}

impl LoadRuleEngine {
    /// Create an engine with no rules
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine from a settings snapshot
    pub fn from_settings(settings: &CoreSettings) -> Self {
        let mut engine = Self::new();
        engine.apply_settings(settings);
        engine
    }

    /// Re-derive both tables from a settings snapshot
    pub fn apply_settings(&mut self, settings: &CoreSettings) {
        self.rules = settings.load_rules.clone();
        self.processor_rules = settings
            .processors
            .iter()
            .filter_map(|p| p.rules.clone().map(|rule| (p.id.clone(), rule)))
            .collect();
        self.rebuild();
    }

    /// Replace the rule table
    pub fn update_rules(&mut self, rules: HashMap<String, Rule<Condition>>) {
        self.rules = rules;
        self.rebuild();
    }

    /// Replace the processor -> rule mapping
    pub fn update_processor_rules(&mut self, processor_rules: HashMap<ProcessorId, Rule<String>>) {
        self.processor_rules = processor_rules;
        self.rebuild();
    }

    fn rebuild(&mut self) {
        self.expanded = self
            .processor_rules
            .iter()
            .map(|(id, rule)| (id.clone(), expand(rule, &self.rules)))
            .collect();
        debug!(
            rules = self.rules.len(),
            processors = self.expanded.len(),
            "Load rules rebuilt"
        );
    }

    /// Evaluate the processor's rule against `payload`, surfacing errors
    pub fn evaluate(&self, processor: &str, payload: &DataObject) -> Result<bool, RuleError> {
        match self.expanded.get(processor) {
            None => Ok(true),
            Some(Ok(rule)) => rule.evaluate(payload),
            Some(Err(e)) => Err(e.clone()),
        }
    }

    /// Whether the processor accepts `payload`. Errors deny.
    #[instrument(level = "trace", skip(self, payload))]
    pub fn rules_allow(&self, processor: &str, payload: &DataObject) -> bool {
        match self.evaluate(processor, payload) {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!(processor, error = %e, "Load rule evaluation failed, denying");
                false
            }
        }
    }
}
