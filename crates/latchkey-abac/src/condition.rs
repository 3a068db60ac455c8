//! Subject attribute conditions.
//!
//! A condition compares one named fact against an expected value. All
//! comparisons fail closed: a missing fact, or a numeric operator whose
//! operands do not parse, is a non-match.

use serde::{Deserialize, Serialize};

use crate::attributes::AttributeStore;

// ============================================================================
// Outcome
// ============================================================================

/// Result of evaluating a single condition or constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Whether the constraint is satisfied.
    pub matched: bool,
    /// Human-readable explanation, suitable for audit details.
    pub reason: String,
}

impl Outcome {
    pub fn matched(reason: impl Into<String>) -> Self {
        Self {
            matched: true,
            reason: reason.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            matched: false,
            reason: reason.into(),
        }
    }
}

// ============================================================================
// Operator
// ============================================================================

/// Comparison applied between a fact and the expected value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionOperator {
    /// Exact string identity.
    Equal,
    /// Exact string difference. A missing fact still does not match.
    NotEqual,
    /// Numeric `fact > expected`.
    GreaterThan,
    /// Numeric `fact < expected`.
    LessThan,
    /// The fact contains the expected value as a substring.
    Contains,
    /// The fact begins with the expected value.
    StartsWith,
}

impl ConditionOperator {
    fn symbol(self) -> &'static str {
        match self {
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::GreaterThan => ">",
            Self::LessThan => "<",
            Self::Contains => "contains",
            Self::StartsWith => "starts with",
        }
    }
}

// ============================================================================
// AttributeCondition
// ============================================================================

/// A single condition on a subject (or resource/environment) fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeCondition {
    pub attribute_name: String,
    pub expected_value: String,
    pub operator: ConditionOperator,
}

impl AttributeCondition {
    pub fn new(
        attribute_name: impl Into<String>,
        operator: ConditionOperator,
        expected_value: impl Into<String>,
    ) -> Self {
        Self {
            attribute_name: attribute_name.into(),
            expected_value: expected_value.into(),
            operator,
        }
    }

    /// Shorthand for an `Equal` condition.
    pub fn equals(attribute_name: impl Into<String>, expected_value: impl Into<String>) -> Self {
        Self::new(attribute_name, ConditionOperator::Equal, expected_value)
    }

    /// Evaluates the condition against a fact set.
    pub fn evaluate(&self, facts: &AttributeStore) -> Outcome {
        let Some(actual) = facts.get(&self.attribute_name) else {
            return Outcome::rejected(format!(
                "attribute '{}' is not present",
                self.attribute_name
            ));
        };

        let Some(holds) = compare(self.operator, actual, &self.expected_value) else {
            return Outcome::rejected(format!(
                "attribute '{}' is not numeric-comparable ('{actual}' {} '{}')",
                self.attribute_name,
                self.operator.symbol(),
                self.expected_value
            ));
        };

        let description = format!(
            "'{}' ({actual}) {} '{}'",
            self.attribute_name,
            self.operator.symbol(),
            self.expected_value
        );
        if holds {
            Outcome::matched(description)
        } else {
            Outcome::rejected(format!("condition failed: {description}"))
        }
    }
}

/// Applies an operator. Returns `None` when a numeric operand fails to parse.
fn compare(operator: ConditionOperator, actual: &str, expected: &str) -> Option<bool> {
    match operator {
        ConditionOperator::Equal => Some(actual == expected),
        ConditionOperator::NotEqual => Some(actual != expected),
        ConditionOperator::Contains => Some(actual.contains(expected)),
        ConditionOperator::StartsWith => Some(actual.starts_with(expected)),
        ConditionOperator::GreaterThan => {
            let (a, e) = parse_numeric_pair(actual, expected)?;
            Some(a > e)
        }
        ConditionOperator::LessThan => {
            let (a, e) = parse_numeric_pair(actual, expected)?;
            Some(a < e)
        }
    }
}

fn parse_numeric_pair(actual: &str, expected: &str) -> Option<(f64, f64)> {
    let a = actual.trim().parse::<f64>().ok()?;
    let e = expected.trim().parse::<f64>().ok()?;
    Some((a, e))
}
