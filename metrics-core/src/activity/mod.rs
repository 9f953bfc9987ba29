//! Activity log model and per-item chain construction.

pub mod chain;
pub mod types;

pub use chain::{analyzed_items, build_activity_chain};
pub use types::{
    ActivityChain, ActivityDetails, ActivityRecord, HistoryEntry, IssueTypeResolver, ItemEvent,
    ACTION_ANALYZE_ITEM, ACTION_UPDATE_ANALYZER, ACTION_UPDATE_ITEM, FIELD_AUTO_ANALYZER_ENABLED,
    FIELD_ISSUE_TYPE,
};
