//! Daily metrics: the stored row, classification scores, chain accumulation
//! and operational-stat folding.

pub mod accumulator;
pub mod operational;
pub mod row;
pub mod scoring;

pub use accumulator::{accumulate, classify_item, is_to_investigate, ItemVerdict};
pub use operational::{fold_operational_stats, OperationalStats, RunMethod, RunRecord};
pub use row::{document_id, DailyMetricsRow, DATETIME_FORMAT, PERFECT_SCORE};
