//! Auto-analysis enabled/disabled timeline reconstructed from toggle events.
//!
//! The activity log only records toggles, so the state of a day without a
//! toggle is inferred from the nearest following toggle: whatever that toggle
//! switched *from* was the state before it.

use crate::activity::{ActivityRecord, ACTION_UPDATE_ANALYZER, FIELD_AUTO_ANALYZER_ENABLED};
use crate::metrics::DailyMetricsRow;
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Feature state at the start and end of one day that had toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayState {
    /// State right after the first toggle of the day.
    pub start: u8,
    /// State right after the last toggle of the day.
    pub end: u8,
}

/// Date → [`DayState`] for every date that saw a toggle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureStateTimeline {
    days: BTreeMap<NaiveDate, DayState>,
}

impl FeatureStateTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold toggle events from `records` (ascending `creation_date`).
    ///
    /// Safe to call repeatedly with overlapping windows: a date's start state
    /// is fixed by the first observation and its end by the last toggle seen.
    pub fn observe(&mut self, records: &[ActivityRecord]) {
        for record in records.iter().filter(|r| r.action == ACTION_UPDATE_ANALYZER) {
            for entry in record.history_for(FIELD_AUTO_ANALYZER_ENABLED) {
                let enabled = u8::from(entry.new_value.eq_ignore_ascii_case("true"));
                let date = record.creation_date.date();
                self.days
                    .entry(date)
                    .and_modify(|state| state.end = enabled)
                    .or_insert(DayState {
                        start: enabled,
                        end: enabled,
                    });
            }
        }
    }

    pub fn get(&self, date: NaiveDate) -> Option<DayState> {
        self.days.get(&date).copied()
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NaiveDate, &DayState)> {
        self.days.iter()
    }

    /// Overwrite `on` for rows ordered by `gather_date`.
    ///
    /// - before the next toggle date: the opposite of that toggle's start state
    /// - on a toggle date: that date's end state, then the rule above against
    ///   the following toggle if there is one
    /// - after every toggle: left as observed
    pub fn apply(&self, rows: &mut [DailyMetricsRow]) {
        let toggles: Vec<(&NaiveDate, &DayState)> = self.days.iter().collect();
        let mut cursor = 0;
        for row in rows.iter_mut() {
            while let Some((date, state)) = toggles.get(cursor) {
                if row.gather_date < **date {
                    row.on = 1 - state.start;
                    break;
                }
                if row.gather_date == **date {
                    row.on = state.end;
                }
                cursor += 1;
            }
        }
    }
}
