//! Auto-analysis metrics core
//!
//! Deterministic derivation of the daily quality metrics of the automatic
//! analysis feature, and the decision policy that retires trained models
//! whose metrics fall below configured thresholds. No I/O lives here; the
//! `metrics-gatherer` service feeds records in and writes results out.
//!
//! # Pipeline
//!
//! ```text
//! activity log ──► build_activity_chain ──► accumulate ──┐
//! run records  ──► fold_operational_stats ───────────────┼─► DailyMetricsRow
//! toggles      ──► FeatureStateTimeline::apply ──────────┘
//!                                                            │
//! rule text    ──► parse_conditions ──► RetirementEngine ◄───┘ (trailing window)
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod activity;
pub mod feature_state;
pub mod metrics;
pub mod retirement;
pub mod schedule;

// Re-export key activity types
pub use activity::{
    analyzed_items, build_activity_chain, ActivityChain, ActivityDetails, ActivityRecord,
    HistoryEntry, IssueTypeResolver, ItemEvent,
};

// Re-export key metrics types
pub use metrics::{
    accumulate, classify_item, document_id, fold_operational_stats, DailyMetricsRow, ItemVerdict,
    OperationalStats, RunMethod, RunRecord,
};

// Re-export feature state types
pub use feature_state::{DayState, FeatureStateTimeline};

// Re-export retirement types
pub use retirement::{
    parse_conditions, ComparisonOperator, MetricsDocument, ModelType, RetirementDecision,
    RetirementEngine, RetirementPolicy, ThresholdCondition,
};

// Re-export schedule helpers
pub use schedule::{
    date_to_check, days_in_range, trailing_window, AllowedWindow, TimeInterval, LOOKBACK_DAYS,
};
