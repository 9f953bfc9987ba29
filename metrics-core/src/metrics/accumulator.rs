//! Per-item classification and the daily accuracy / override counts.
//!
//! Each item's chain is read twice:
//!
//! ```text
//! pass 1: analyze ... manual      → did a user override the analyzer? (first override only)
//! pass 2: analyze ... manual*     → (predicted, actual) label pair for accuracy / F1
//! ```
//!
//! Manual moves into or out of the "To Investigate" bucket are not overrides;
//! they are counted separately as manual analysis.

use super::row::{DailyMetricsRow, PERFECT_SCORE};
use super::scoring::{accuracy, macro_f1, to_stored_score};
use crate::activity::{ActivityChain, ItemEvent};
use std::collections::HashSet;

/// Issue-type locators of the provisional "To Investigate" group start with this.
///
/// Matched case-insensitively as a prefix, so any future locator starting
/// with "ti" is treated the same way.
pub const TO_INVESTIGATE_PREFIX: &str = "ti";

/// Whether `code` belongs to the "To Investigate" group.
pub fn is_to_investigate(code: &str) -> bool {
    code.get(..TO_INVESTIGATE_PREFIX.len())
        .is_some_and(|p| p.eq_ignore_ascii_case(TO_INVESTIGATE_PREFIX))
}

/// What one item's chain contributes to the day.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemVerdict {
    /// At least one automatic analysis appears in the chain.
    pub was_analyzed: bool,
    /// A user overrode an automatic verdict.
    pub changed: bool,
    /// Manual events moving into or out of "To Investigate".
    pub manually_analyzed: u64,
    /// `(predicted, actual)` issue types, when the item was analyzed.
    pub sample: Option<(String, String)>,
}

/// Classify one item's ordered events.
pub fn classify_item(events: &[ItemEvent]) -> ItemVerdict {
    let mut verdict = ItemVerdict::default();

    let mut seen_analyze = false;
    for event in events {
        match event {
            ItemEvent::Manual { new, old } if is_to_investigate(new) || is_to_investigate(old) => {
                verdict.manually_analyzed += 1;
            }
            ItemEvent::Analyze { .. } => seen_analyze = true,
            ItemEvent::Manual { .. } if seen_analyze => {
                verdict.changed = true;
                break;
            }
            ItemEvent::Manual { .. } => {}
        }
    }
    verdict.was_analyzed = events.iter().any(ItemEvent::is_analyze);

    let mut predicted: Option<&str> = None;
    let mut actual: Option<&str> = None;
    for event in events {
        match event {
            ItemEvent::Analyze { code } => {
                predicted = Some(code);
                actual = None;
            }
            ItemEvent::Manual { new, old }
                if predicted.is_some() && !is_to_investigate(new) && !is_to_investigate(old) =>
            {
                actual = Some(new);
            }
            ItemEvent::Manual { .. } => {}
        }
    }
    verdict.sample = predicted.map(|p| (p.to_string(), actual.unwrap_or(p).to_string()));

    verdict
}

/// Fold `chain` into `row`.
///
/// `launch_of` resolves the launch an analyzed item belongs to. The distinct
/// launch count is merged into `row.launch_analyzed` by maximum, so a larger
/// count already present (from run logs) survives.
pub fn accumulate<F>(chain: &ActivityChain, mut row: DailyMetricsRow, launch_of: F) -> DailyMetricsRow
where
    F: Fn(i64) -> Option<i64>,
{
    let mut changed = 0u64;
    let mut analyzed = 0u64;
    let mut manually_analyzed = 0u64;
    let mut launches = HashSet::new();
    let mut predicted = Vec::new();
    let mut actual = Vec::new();

    for (item_id, events) in chain {
        let verdict = classify_item(events);
        manually_analyzed += verdict.manually_analyzed;
        if verdict.changed {
            changed += 1;
        }
        if verdict.was_analyzed {
            analyzed += 1;
            if let Some(launch_id) = launch_of(*item_id) {
                launches.insert(launch_id);
            }
        }
        if let Some((p, a)) = verdict.sample {
            predicted.push(p);
            actual.push(a);
        }
    }

    row.aa_analyzed = analyzed;
    row.changed_type = changed;
    row.manually_analyzed = manually_analyzed;
    row.merge_launch_analyzed(launches.len() as u64);

    if predicted.is_empty() {
        row.accuracy = PERFECT_SCORE;
        row.f1_score = PERFECT_SCORE;
    } else {
        row.accuracy = to_stored_score(accuracy(&actual, &predicted));
        row.f1_score = to_stored_score(macro_f1(&actual, &predicted));
    }
    row
}
