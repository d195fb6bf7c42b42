//! Load rule data model: boolean trees over conditions or rule ids.

use serde::{Deserialize, Serialize};

use crate::VariableAccessor;

/// Boolean expression tree.
///
/// `T` is [`Condition`] for rule definitions and `String` (a rule id) for the
/// per-processor rule expressions that reference them.
///
/// Serialized externally tagged: `{"and": [...]}`, `{"or": [...]}`,
/// `{"not": {...}}`, `{"leaf": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule<T> {
    /// True when every child is true; empty is true
    And(Vec<Rule<T>>),
    /// True when any child is true; empty is false
    Or(Vec<Rule<T>>),
    /// Negation
    Not(Box<Rule<T>>),
    /// Atomic item
    Leaf(T),
}

impl<T> Rule<T> {
    /// Convenience constructor for `Not`
    pub fn negate(rule: Rule<T>) -> Self {
        Self::Not(Box::new(rule))
    }

    /// All leaves, depth-first, left to right.
    pub fn leaves(&self) -> Vec<&T> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a T>) {
        match self {
            Self::And(children) | Self::Or(children) => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
            Self::Not(child) => child.collect_leaves(out),
            Self::Leaf(item) => out.push(item),
        }
    }
}

/// Atomic load-rule condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Payload variable the condition reads
    pub variable: VariableAccessor,

    /// Comparison applied to the variable
    pub operator: ConditionOperator,

    /// Operand for operators that need one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    /// Case-insensitive comparison for string operators
    #[serde(default)]
    pub ignore_case: bool,
}

impl Condition {
    /// Condition with a filter value
    pub fn new(
        variable: impl Into<VariableAccessor>,
        operator: ConditionOperator,
        filter: impl Into<String>,
    ) -> Self {
        Self {
            variable: variable.into(),
            operator,
            filter: Some(filter.into()),
            ignore_case: false,
        }
    }

    /// Condition whose operator takes no filter
    pub fn unary(variable: impl Into<VariableAccessor>, operator: ConditionOperator) -> Self {
        Self {
            variable: variable.into(),
            operator,
            filter: None,
            ignore_case: false,
        }
    }

    /// Enable case-insensitive comparison
    pub fn ignoring_case(mut self) -> Self {
        self.ignore_case = true;
        self
    }
}

/// Condition operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    IsDefined,
    IsNotDefined,
    IsBadgeAssigned,
    IsBadgeNotAssigned,
    /// Missing variable is an error
    IsEmpty,
    /// Missing variable is an error
    IsNotEmpty,
    /// Missing variable evaluates to false
    IsPopulated,
    /// Missing variable evaluates to false
    IsNotPopulated,
    Equals,
    DoesNotEqual,
    Contains,
    DoesNotContain,
    StartsWith,
    DoesNotStartWith,
    EndsWith,
    DoesNotEndWith,
    Regex,
    DoesNotMatchRegex,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
}

impl ConditionOperator {
    /// Whether the operator compares against `filter`.
    pub fn requires_filter(self) -> bool {
        !matches!(
            self,
            Self::IsDefined
                | Self::IsNotDefined
                | Self::IsBadgeAssigned
                | Self::IsBadgeNotAssigned
                | Self::IsEmpty
                | Self::IsNotEmpty
                | Self::IsPopulated
                | Self::IsNotPopulated
        )
    }

    /// Snake-case name, as used in configuration.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IsDefined => "is_defined",
            Self::IsNotDefined => "is_not_defined",
            Self::IsBadgeAssigned => "is_badge_assigned",
            Self::IsBadgeNotAssigned => "is_badge_not_assigned",
            Self::IsEmpty => "is_empty",
            Self::IsNotEmpty => "is_not_empty",
            Self::IsPopulated => "is_populated",
            Self::IsNotPopulated => "is_not_populated",
            Self::Equals => "equals",
            Self::DoesNotEqual => "does_not_equal",
            Self::Contains => "contains",
            Self::DoesNotContain => "does_not_contain",
            Self::StartsWith => "starts_with",
            Self::DoesNotStartWith => "does_not_start_with",
            Self::EndsWith => "ends_with",
            Self::DoesNotEndWith => "does_not_end_with",
            Self::Regex => "regex",
            Self::DoesNotMatchRegex => "does_not_match_regex",
            Self::GreaterThan => "greater_than",
            Self::GreaterThanOrEqual => "greater_than_or_equal",
            Self::LessThan => "less_than",
            Self::LessThanOrEqual => "less_than_or_equal",
        }
    }
}
