//! Load rule evaluation errors

use std::fmt;
use thiserror::Error;

/// Which operand of a numeric comparison failed to parse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberSide {
    /// The payload value
    DataItem,
    /// The condition's filter
    Filter,
}

impl fmt::Display for NumberSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataItem => f.write_str("data item"),
            Self::Filter => f.write_str("filter"),
        }
    }
}

/// Typed failure raised while evaluating a rule
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    /// Variable absent from the payload
    #[error("missing data item '{variable}'")]
    MissingDataItem { variable: String },

    /// Operator needs a filter but the condition has none
    #[error("operator '{operator}' on '{variable}' requires a filter")]
    MissingFilter {
        variable: String,
        operator: &'static str,
    },

    /// Numeric comparison operand is not a number
    #[error("cannot parse {side} '{value}' as a number: {reason}")]
    NumberParse {
        side: NumberSide,
        value: String,
        reason: String,
    },

    /// Operator cannot be applied to this kind of value
    #[error("operator '{operator}' is not supported for {value_type} values")]
    OperationNotSupported {
        operator: &'static str,
        value_type: &'static str,
    },

    /// Filter is not a valid regular expression
    #[error("invalid regular expression '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },

    /// Processor rule references an unknown rule id
    #[error("load rule '{rule_id}' not found")]
    RuleNotFound { rule_id: String },
}

impl RuleError {
    /// Create missing data item error
    pub fn missing_data_item(variable: impl ToString) -> Self {
        Self::MissingDataItem {
            variable: variable.to_string(),
        }
    }

    /// Create number parse error
    pub fn number_parse(side: NumberSide, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NumberParse {
            side,
            value: value.into(),
            reason: reason.into(),
        }
    }
}
