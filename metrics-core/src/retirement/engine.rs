//! Retirement decisions for trained models.
//!
//! Consumes the metrics documents gathered over a trailing window and a
//! policy per model type. No I/O here: fetching the window and calling the
//! model service belong to the caller.

use super::conditions::{parse_conditions, ThresholdCondition};
use crate::metrics::scoring::round_to;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;

/// A stored metrics document, addressed by column name.
pub type MetricsDocument = Map<String, Value>;

/// Model families the analyzer trains per project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    AutoAnalysis,
    Suggest,
}

impl ModelType {
    pub const ALL: [ModelType; 2] = [ModelType::AutoAnalysis, ModelType::Suggest];

    /// Name used on the wire to the model service and in audit documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoAnalysis => "auto_analysis",
            Self::Suggest => "suggest",
        }
    }

    /// Index holding the metrics this model type is judged on.
    pub fn metrics_index(&self) -> &'static str {
        match self {
            Self::AutoAnalysis => "rp_stats",
            Self::Suggest => "rp_suggestions_info_metrics",
        }
    }

    /// Datetime column used to select the trailing window in that index.
    pub fn window_field(&self) -> &'static str {
        match self {
            Self::AutoAnalysis => "gather_datetime",
            Self::Suggest => "savedDate",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of evaluating one model type's policy over a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetirementDecision {
    pub model_type: ModelType,
    pub should_delete: bool,
    /// `(field, mean)` for every condition that had at least one value.
    pub evaluated_metrics: Vec<(String, f64)>,
    pub module_version: BTreeSet<String>,
}

impl RetirementDecision {
    /// `"field:value;field:value"` for the audit document. Whole means keep
    /// one decimal (`96.0`).
    pub fn metrics_summary(&self) -> String {
        self.evaluated_metrics
            .iter()
            .map(|(field, mean)| format!("{field}:{}", format_mean(*mean)))
            .collect::<Vec<_>>()
            .join(";")
    }
}

fn format_mean(mean: f64) -> String {
    if mean.is_finite() && mean.fract() == 0.0 {
        format!("{:.1}", mean)
    } else {
        mean.to_string()
    }
}

/// The retirement rules configured for one model type.
#[derive(Debug, Clone, PartialEq)]
pub struct RetirementPolicy {
    pub model_type: ModelType,
    /// The rule text as configured, kept for audit documents.
    pub rules: String,
    pub conditions: Vec<ThresholdCondition>,
}

impl RetirementPolicy {
    pub fn new(model_type: ModelType, rules: &str) -> Self {
        Self {
            model_type,
            rules: rules.to_string(),
            conditions: parse_conditions(rules),
        }
    }

    /// Evaluate every condition independently; any one met retires the model.
    ///
    /// Documents lacking a condition's field, or holding a non-numeric value
    /// there, are left out of that field's mean.
    pub fn evaluate(&self, documents: &[MetricsDocument]) -> RetirementDecision {
        let mut should_delete = false;
        let mut evaluated_metrics = Vec::new();

        for condition in &self.conditions {
            let values: Vec<f64> = documents
                .iter()
                .filter_map(|doc| doc.get(&condition.field).and_then(Value::as_f64))
                .collect();
            if values.is_empty() {
                continue;
            }
            let mean = round_to(values.iter().sum::<f64>() / values.len() as f64, 2);
            if condition.is_met_by(mean) {
                should_delete = true;
            }
            evaluated_metrics.push((condition.field.clone(), mean));
        }

        RetirementDecision {
            model_type: self.model_type,
            should_delete,
            evaluated_metrics,
            module_version: collect_module_versions(documents),
        }
    }
}

fn collect_module_versions(documents: &[MetricsDocument]) -> BTreeSet<String> {
    documents
        .iter()
        .filter_map(|doc| doc.get("module_version").and_then(Value::as_array))
        .flatten()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect()
}

/// Policies for every model type, keyed by [`ModelType`].
#[derive(Debug, Clone)]
pub struct RetirementEngine {
    policies: Vec<RetirementPolicy>,
}

impl RetirementEngine {
    pub fn new(auto_analysis_rules: &str, suggest_rules: &str) -> Self {
        Self {
            policies: vec![
                RetirementPolicy::new(ModelType::AutoAnalysis, auto_analysis_rules),
                RetirementPolicy::new(ModelType::Suggest, suggest_rules),
            ],
        }
    }

    pub fn policy(&self, model_type: ModelType) -> Option<&RetirementPolicy> {
        self.policies.iter().find(|p| p.model_type == model_type)
    }

    pub fn policies(&self) -> &[RetirementPolicy] {
        &self.policies
    }

    /// Decide for `model_type`; a type without a policy is never retired.
    pub fn evaluate(&self, model_type: ModelType, documents: &[MetricsDocument]) -> RetirementDecision {
        match self.policy(model_type) {
            Some(policy) => policy.evaluate(documents),
            None => RetirementDecision {
                model_type,
                should_delete: false,
                evaluated_metrics: Vec::new(),
                module_version: BTreeSet::new(),
            },
        }
    }
}
