//! Folds activity records into per-item classification chains.

use super::types::{
    ActivityChain, ActivityRecord, IssueTypeResolver, ItemEvent, ACTION_ANALYZE_ITEM,
    ACTION_UPDATE_ITEM, FIELD_ISSUE_TYPE,
};

/// Group `records` by test item, keeping input order inside each chain.
///
/// Only `analyzeItem` and `updateItem` records contribute; within them only
/// history entries on `issueType`. An item touched by one of those actions
/// always gets a chain, even if it ends up empty.
pub fn build_activity_chain(
    records: &[ActivityRecord],
    resolver: &IssueTypeResolver,
) -> ActivityChain {
    let mut chain = ActivityChain::new();
    for record in records {
        let analyzed = match record.action.as_str() {
            ACTION_ANALYZE_ITEM => true,
            ACTION_UPDATE_ITEM => false,
            _ => continue,
        };
        let events = chain.entry(record.object_id).or_default();
        for entry in record.history_for(FIELD_ISSUE_TYPE) {
            let new = resolver.resolve(&entry.new_value);
            if analyzed {
                events.push(ItemEvent::analyze(new));
            } else {
                events.push(ItemEvent::manual(new, resolver.resolve(&entry.old_value)));
            }
        }
    }
    chain
}

/// Item ids whose chain contains at least one automatic analysis.
pub fn analyzed_items(chain: &ActivityChain) -> Vec<i64> {
    chain
        .iter()
        .filter(|(_, events)| events.iter().any(ItemEvent::is_analyze))
        .map(|(id, _)| *id)
        .collect()
}
