//! Model retirement: threshold rule parsing and per-model-type evaluation.
//!
//! ```text
//! "f1-score<=80|percent_not_found_aa>70"
//!     │ parse_conditions
//!     ▼
//! [ThresholdCondition, ...] ──► mean of each field over the window
//!                                   │ any condition met?
//!                                   ▼
//!                           RetirementDecision
//! ```

pub mod conditions;
pub mod engine;

pub use conditions::{parse_conditions, ComparisonOperator, ThresholdCondition};
pub use engine::{MetricsDocument, ModelType, RetirementDecision, RetirementEngine, RetirementPolicy};
