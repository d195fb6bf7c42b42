//! Leaf condition evaluation.

use contracts::{
    contains_object, stringify_value, value_type_name, Condition, ConditionOperator, DataObject,
};
use regex::RegexBuilder;
use serde_json::Value;

use crate::error::{NumberSide, RuleError};
use crate::Evaluate;

/// String comparison family, before negation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StringMatch {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
}

/// Numeric comparison family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NumericCompare {
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
}

impl Evaluate for Condition {
    fn evaluate(&self, payload: &DataObject) -> Result<bool, RuleError> {
        use ConditionOperator::*;

        let value = self.variable.resolve(payload);
        match self.operator {
            IsDefined | IsBadgeAssigned => Ok(value.is_some()),
            IsNotDefined | IsBadgeNotAssigned => Ok(value.is_none()),
            IsEmpty => self.require_value(value).map(is_empty),
            IsNotEmpty => self.require_value(value).map(|v| !is_empty(v)),
            IsPopulated => Ok(value.is_some_and(|v| !is_empty(v))),
            IsNotPopulated => Ok(value.is_some_and(is_empty)),
            Equals => self.compare_strings(value, StringMatch::Equals, false),
            DoesNotEqual => self.compare_strings(value, StringMatch::Equals, true),
            Contains => self.compare_strings(value, StringMatch::Contains, false),
            DoesNotContain => self.compare_strings(value, StringMatch::Contains, true),
            StartsWith => self.compare_strings(value, StringMatch::StartsWith, false),
            DoesNotStartWith => self.compare_strings(value, StringMatch::StartsWith, true),
            EndsWith => self.compare_strings(value, StringMatch::EndsWith, false),
            DoesNotEndWith => self.compare_strings(value, StringMatch::EndsWith, true),
            Regex => self.compare_strings(value, StringMatch::Regex, false),
            DoesNotMatchRegex => self.compare_strings(value, StringMatch::Regex, true),
            GreaterThan => self.compare_numbers(value, NumericCompare::Greater),
            GreaterThanOrEqual => self.compare_numbers(value, NumericCompare::GreaterOrEqual),
            LessThan => self.compare_numbers(value, NumericCompare::Less),
            LessThanOrEqual => self.compare_numbers(value, NumericCompare::LessOrEqual),
        }
    }
}

trait ConditionExt {
    fn require_value<'a>(&self, value: Option<&'a Value>) -> Result<&'a Value, RuleError>;
    fn require_filter(&self) -> Result<&str, RuleError>;
    fn compare_strings(
        &self,
        value: Option<&Value>,
        kind: StringMatch,
        negated: bool,
    ) -> Result<bool, RuleError>;
    fn compare_numbers(&self, value: Option<&Value>, kind: NumericCompare)
        -> Result<bool, RuleError>;
}

impl ConditionExt for Condition {
    fn require_value<'a>(&self, value: Option<&'a Value>) -> Result<&'a Value, RuleError> {
        value.ok_or_else(|| RuleError::missing_data_item(&self.variable))
    }

    fn require_filter(&self) -> Result<&str, RuleError> {
        self.filter
            .as_deref()
            .ok_or_else(|| RuleError::MissingFilter {
                variable: self.variable.to_string(),
                operator: self.operator.as_str(),
            })
    }

    fn compare_strings(
        &self,
        value: Option<&Value>,
        kind: StringMatch,
        negated: bool,
    ) -> Result<bool, RuleError> {
        let value = self.require_value(value)?;
        let filter = self.require_filter()?;

        if contains_object(value) {
            return match kind {
                StringMatch::Contains | StringMatch::StartsWith | StringMatch::EndsWith => {
                    Err(RuleError::OperationNotSupported {
                        operator: self.operator.as_str(),
                        value_type: value_type_name(value),
                    })
                }
                // Neither the operator nor its negation matches.
                StringMatch::Equals | StringMatch::Regex => Ok(false),
            };
        }
        let Some(text) = stringify_value(value) else {
            return Ok(false);
        };

        let fold = |s: &str| {
            if self.ignore_case {
                s.to_lowercase()
            } else {
                s.to_string()
            }
        };
        let hit = match kind {
            StringMatch::Equals => fold(&text) == fold(filter),
            StringMatch::Contains => fold(&text).contains(&fold(filter)),
            StringMatch::StartsWith => fold(&text).starts_with(&fold(filter)),
            StringMatch::EndsWith => fold(&text).ends_with(&fold(filter)),
            StringMatch::Regex => RegexBuilder::new(filter)
                .case_insensitive(self.ignore_case)
                .build()
                .map_err(|e| RuleError::InvalidRegex {
                    pattern: filter.to_string(),
                    reason: e.to_string(),
                })?
                .is_match(&text),
        };

        Ok(hit != negated)
    }

    fn compare_numbers(
        &self,
        value: Option<&Value>,
        kind: NumericCompare,
    ) -> Result<bool, RuleError> {
        let value = self.require_value(value)?;
        let filter = self.require_filter()?;

        let lhs = data_item_number(value)?;
        let rhs = parse_number(filter, NumberSide::Filter)?;

        // Any comparison with NaN is false.
        Ok(match kind {
            NumericCompare::Greater => lhs > rhs,
            NumericCompare::GreaterOrEqual => lhs >= rhs,
            NumericCompare::Less => lhs < rhs,
            NumericCompare::LessOrEqual => lhs <= rhs,
        })
    }
}

/// Empty string, empty array, empty object and null are empty.
fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

fn data_item_number(value: &Value) -> Result<f64, RuleError> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| {
            RuleError::number_parse(NumberSide::DataItem, n.to_string(), "out of f64 range")
        }),
        Value::String(s) => parse_number(s, NumberSide::DataItem),
        other => Err(RuleError::number_parse(
            NumberSide::DataItem,
            other.to_string(),
            format!("{} is not numeric", value_type_name(other)),
        )),
    }
}

/// Parses decimals plus `Infinity`, `-Infinity` and `NaN`.
fn parse_number(raw: &str, side: NumberSide) -> Result<f64, RuleError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|e| RuleError::number_parse(side, raw, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::VariableAccessor;
    use serde_json::json;

    fn payload() -> DataObject {
        json!({
            "event": "Purchase",
            "count": 5,
            "price": "19.99",
            "flag": true,
            "nothing": null,
            "blank": "",
            "list": ["a", "b"],
            "empty_list": [],
            "dict": {"k": "v"},
            "mixed": ["a", {"k": "v"}],
            "nan": "NaN",
            "inf": "Infinity",
            "word": "abc",
            "order": {"total": 42}
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    fn check(variable: &str, operator: ConditionOperator, filter: &str) -> Result<bool, RuleError> {
        Condition::new(variable, operator, filter).evaluate(&payload())
    }

    fn unary(variable: &str, operator: ConditionOperator) -> Result<bool, RuleError> {
        Condition::unary(variable, operator).evaluate(&payload())
    }

    #[test]
    fn string_operators_stringify_scalars() {
        use ConditionOperator::*;
        assert_eq!(check("count", Equals, "5"), Ok(true));
        assert_eq!(check("flag", Equals, "true"), Ok(true));
        assert_eq!(check("event", Contains, "chas"), Ok(true));
        assert_eq!(check("event", StartsWith, "Pur"), Ok(true));
        assert_eq!(check("event", EndsWith, "ase"), Ok(true));
        assert_eq!(check("event", DoesNotEqual, "purchase"), Ok(true));
        assert_eq!(check("list", Equals, "a,b"), Ok(true));
        assert_eq!(check("count", Regex, r"^\d+$"), Ok(true));
        assert_eq!(check("event", DoesNotMatchRegex, "^x"), Ok(true));
    }

    #[test]
    fn ignore_case_is_per_condition() {
        let condition = Condition::new("event", ConditionOperator::Equals, "purchase");
        assert_eq!(condition.evaluate(&payload()), Ok(false));
        assert_eq!(condition.ignoring_case().evaluate(&payload()), Ok(true));

        let regex = Condition::new("event", ConditionOperator::Regex, "^purchase$").ignoring_case();
        assert_eq!(regex.evaluate(&payload()), Ok(true));
    }

    #[test]
    fn dictionaries_raise_for_contains_family() {
        use ConditionOperator::*;
        for op in [Contains, DoesNotContain, StartsWith, EndsWith, DoesNotEndWith] {
            assert!(matches!(
                check("dict", op, "v"),
                Err(RuleError::OperationNotSupported { .. })
            ));
            assert!(matches!(
                check("mixed", op, "a"),
                Err(RuleError::OperationNotSupported { .. })
            ));
        }
        assert_eq!(check("dict", Equals, "v"), Ok(false));
        assert_eq!(check("dict", DoesNotEqual, "v"), Ok(false));
        assert_eq!(check("nothing", Equals, "null"), Ok(false));
    }

    #[test]
    fn definedness_treats_null_as_defined() {
        use ConditionOperator::*;
        assert_eq!(unary("nothing", IsDefined), Ok(true));
        assert_eq!(unary("absent", IsDefined), Ok(false));
        assert_eq!(unary("absent", IsNotDefined), Ok(true));
        assert_eq!(unary("event", IsBadgeAssigned), Ok(true));
        assert_eq!(unary("absent", IsBadgeNotAssigned), Ok(true));

        let through_scalar = Condition::unary(
            VariableAccessor::nested(["event"], "inner"),
            IsDefined,
        );
        assert_eq!(through_scalar.evaluate(&payload()), Ok(false));
    }

    #[test]
    fn emptiness_families() {
        use ConditionOperator::*;
        for key in ["blank", "empty_list", "nothing"] {
            assert_eq!(unary(key, IsEmpty), Ok(true), "{key}");
        }
        assert_eq!(unary("word", IsNotEmpty), Ok(true));
        assert_eq!(unary("count", IsEmpty), Ok(false));
        assert!(matches!(
            unary("absent", IsEmpty),
            Err(RuleError::MissingDataItem { .. })
        ));

        // Legacy family never raises.
        assert_eq!(unary("absent", IsPopulated), Ok(false));
        assert_eq!(unary("absent", IsNotPopulated), Ok(false));
        assert_eq!(unary("blank", IsNotPopulated), Ok(true));
        assert_eq!(unary("word", IsPopulated), Ok(true));
    }

    #[test]
    fn numeric_comparisons() {
        use ConditionOperator::*;
        assert_eq!(check("count", GreaterThan, "4"), Ok(true));
        assert_eq!(check("count", GreaterThanOrEqual, "5"), Ok(true));
        assert_eq!(check("price", LessThan, "20"), Ok(true));
        assert_eq!(check("price", LessThanOrEqual, "19.98"), Ok(false));
        assert_eq!(check("inf", GreaterThan, "1e308"), Ok(true));
        assert_eq!(check("count", GreaterThan, "-Infinity"), Ok(true));

        let nested = Condition::new(
            VariableAccessor::nested(["order"], "total"),
            GreaterThan,
            "40",
        );
        assert_eq!(nested.evaluate(&payload()), Ok(true));
    }

    #[test]
    fn nan_never_compares() {
        use ConditionOperator::*;
        for op in [GreaterThan, GreaterThanOrEqual, LessThan, LessThanOrEqual] {
            assert_eq!(check("nan", op, "1"), Ok(false));
            assert_eq!(check("count", op, "NaN"), Ok(false));
        }
    }

    #[test]
    fn numeric_errors_identify_side() {
        use ConditionOperator::*;
        match check("word", GreaterThan, "1") {
            Err(RuleError::NumberParse { side, value, .. }) => {
                assert_eq!(side, NumberSide::DataItem);
                assert_eq!(value, "abc");
            }
            other => panic!("unexpected {other:?}"),
        }
        match check("count", LessThan, "ten") {
            Err(RuleError::NumberParse { side, value, .. }) => {
                assert_eq!(side, NumberSide::Filter);
                assert_eq!(value, "ten");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            check("absent", LessThan, "1"),
            Err(RuleError::MissingDataItem { .. })
        ));
        assert!(matches!(
            unary("count", LessThan),
            Err(RuleError::MissingFilter { .. })
        ));
    }

    #[test]
    fn invalid_regex_is_typed() {
        assert!(matches!(
            check("word", ConditionOperator::Regex, "("),
            Err(RuleError::InvalidRegex { .. })
        ));
    }

    #[test]
    fn legacy_adapter_swallows_errors() {
        let condition = Condition::new("absent", ConditionOperator::Equals, "x");
        assert!(condition.evaluate(&payload()).is_err());
        assert!(!condition.matches(&payload()));
    }
}
