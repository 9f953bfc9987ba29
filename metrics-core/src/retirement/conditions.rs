//! Threshold rule grammar: `field<op>value|field<op>value|...`
//!
//! Rules come from operator-edited environment variables. A segment that
//! does not parse is dropped; parsing never fails.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Comparison between an observed mean and a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOperator {
    GreaterOrEqual,
    LessOrEqual,
    Equal,
    Less,
    Greater,
}

/// Candidate spellings, two-character operators first.
const OPERATOR_SPELLINGS: [(&str, ComparisonOperator); 6] = [
    (">=", ComparisonOperator::GreaterOrEqual),
    ("<=", ComparisonOperator::LessOrEqual),
    ("==", ComparisonOperator::Equal),
    ("=", ComparisonOperator::Equal),
    ("<", ComparisonOperator::Less),
    (">", ComparisonOperator::Greater),
];

impl ComparisonOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GreaterOrEqual => ">=",
            Self::LessOrEqual => "<=",
            Self::Equal => "==",
            Self::Less => "<",
            Self::Greater => ">",
        }
    }

    /// `value <op> threshold`.
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::GreaterOrEqual => value >= threshold,
            Self::LessOrEqual => value <= threshold,
            Self::Equal => value == threshold,
            Self::Less => value < threshold,
            Self::Greater => value > threshold,
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `field <op> threshold` rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdCondition {
    pub field: String,
    pub operator: ComparisonOperator,
    pub threshold: f64,
}

impl ThresholdCondition {
    pub fn new(field: &str, operator: ComparisonOperator, threshold: f64) -> Self {
        Self {
            field: field.to_string(),
            operator,
            threshold,
        }
    }

    pub fn is_met_by(&self, value: f64) -> bool {
        self.operator.holds(value, self.threshold)
    }
}

impl fmt::Display for ThresholdCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.field, self.operator, self.threshold)
    }
}

/// Integer literal first, float second.
fn parse_threshold(literal: &str) -> Option<f64> {
    literal
        .parse::<i64>()
        .map(|v| v as f64)
        .or_else(|_| literal.parse::<f64>())
        .ok()
}

fn parse_segment(segment: &str) -> Option<ThresholdCondition> {
    let (spelling, operator) = OPERATOR_SPELLINGS
        .iter()
        .find(|(spelling, _)| segment.contains(spelling))?;
    let replaced = segment.replace(spelling, " ");
    let tokens: Vec<&str> = replaced.split_whitespace().collect();
    let [field, literal] = tokens.as_slice() else {
        return None;
    };
    let threshold = parse_threshold(literal)?;
    Some(ThresholdCondition::new(field, *operator, threshold))
}

/// Parse a `|`-separated rule set, dropping blank and malformed segments.
pub fn parse_conditions(text: &str) -> Vec<ThresholdCondition> {
    text.split('|')
        .filter(|segment| !segment.trim().is_empty())
        .filter_map(|segment| {
            let parsed = parse_segment(segment);
            if parsed.is_none() {
                debug!(segment, "Dropping malformed retirement condition");
            }
            parsed
        })
        .collect()
}
