//! Rule tree evaluation and processor rule expansion.

use contracts::{Condition, DataObject, Rule};
use std::collections::HashMap;

use crate::error::RuleError;
use crate::Evaluate;

/// Evaluate `rule` with `leaf` deciding each leaf.
///
/// `And` stops at the first false child, `Or` at the first true child.
/// Errors short-circuit and propagate unchanged.
pub fn evaluate_with<T, E, F>(rule: &Rule<T>, leaf: &mut F) -> Result<bool, E>
where
    F: FnMut(&T) -> Result<bool, E>,
{
    match rule {
        Rule::And(children) => {
            for child in children {
                if !evaluate_with(child, leaf)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Rule::Or(children) => {
            for child in children {
                if evaluate_with(child, leaf)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Rule::Not(child) => evaluate_with(child, leaf).map(|v| !v),
        Rule::Leaf(item) => leaf(item),
    }
}

impl Evaluate for Rule<Condition> {
    fn evaluate(&self, payload: &DataObject) -> Result<bool, RuleError> {
        evaluate_with(self, &mut |condition: &Condition| condition.evaluate(payload))
    }
}

/// Replace every rule id in `rule` with the referenced condition tree.
pub fn expand(
    rule: &Rule<String>,
    rules: &HashMap<String, Rule<Condition>>,
) -> Result<Rule<Condition>, RuleError> {
    Ok(match rule {
        Rule::And(children) => Rule::And(expand_all(children, rules)?),
        Rule::Or(children) => Rule::Or(expand_all(children, rules)?),
        Rule::Not(child) => Rule::negate(expand(child, rules)?),
        Rule::Leaf(id) => rules
            .get(id)
            .cloned()
            .ok_or_else(|| RuleError::RuleNotFound {
                rule_id: id.clone(),
            })?,
    })
}

fn expand_all(
    children: &[Rule<String>],
    rules: &HashMap<String, Rule<Condition>>,
) -> Result<Vec<Rule<Condition>>, RuleError> {
    children.iter().map(|child| expand(child, rules)).collect()
}
