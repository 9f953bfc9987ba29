//! Activity log records and the per-item event chain derived from them.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Action written when the analyzer assigns an issue type automatically.
pub const ACTION_ANALYZE_ITEM: &str = "analyzeItem";
/// Action written when a user edits a test item.
pub const ACTION_UPDATE_ITEM: &str = "updateItem";
/// Action written when project analyzer settings change.
pub const ACTION_UPDATE_ANALYZER: &str = "updateAnalyzer";

/// History field carrying the issue type of a test item.
pub const FIELD_ISSUE_TYPE: &str = "issueType";
/// History field carrying the auto-analysis toggle of a project.
pub const FIELD_AUTO_ANALYZER_ENABLED: &str = "analyzer.isAutoAnalyzerEnabled";

/// A single field change inside an activity record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub field: String,
    #[serde(rename = "oldValue", default)]
    pub old_value: String,
    #[serde(rename = "newValue", default)]
    pub new_value: String,
}

impl HistoryEntry {
    pub fn new(field: &str, old_value: &str, new_value: &str) -> Self {
        Self {
            field: field.to_string(),
            old_value: old_value.to_string(),
            new_value: new_value.to_string(),
        }
    }
}

/// The `details` column of an activity record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityDetails {
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// One row of the append-only activity log.
///
/// Records arrive ordered by `creation_date` ascending for a single project
/// and date window; nothing in this crate reorders them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    #[serde(default)]
    pub entity: String,
    pub action: String,
    pub object_id: i64,
    pub creation_date: NaiveDateTime,
    #[serde(default)]
    pub details: ActivityDetails,
}

impl ActivityRecord {
    /// History entries touching `field`, in record order.
    pub fn history_for<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a HistoryEntry> {
        self.details.history.iter().filter(move |h| h.field == field)
    }
}

/// A normalized classification event for one test item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemEvent {
    /// The analyzer assigned `code`.
    Analyze { code: String },
    /// A user moved the item from `old` to `new`.
    Manual { new: String, old: String },
}

impl ItemEvent {
    pub fn analyze(code: &str) -> Self {
        Self::Analyze {
            code: code.to_string(),
        }
    }

    pub fn manual(new: &str, old: &str) -> Self {
        Self::Manual {
            new: new.to_string(),
            old: old.to_string(),
        }
    }

    pub fn is_analyze(&self) -> bool {
        matches!(self, Self::Analyze { .. })
    }
}

/// Item id → ordered events. Rebuilt for every (project, window); never stored.
pub type ActivityChain = BTreeMap<i64, Vec<ItemEvent>>;

/// Maps a project's issue-type names to their stable locators.
///
/// Names without a mapping resolve to themselves.
#[derive(Debug, Clone, Default)]
pub struct IssueTypeResolver {
    codes: HashMap<String, String>,
}

impl IssueTypeResolver {
    pub fn new(codes: HashMap<String, String>) -> Self {
        Self { codes }
    }

    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        self.codes.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

impl FromIterator<(String, String)> for IssueTypeResolver {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            codes: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolver_passes_unknown_names_through() {
        let resolver: IssueTypeResolver = [("Product Bug".to_string(), "pb001".to_string())]
            .into_iter()
            .collect();
        assert_eq!(resolver.resolve("Product Bug"), "pb001");
        assert_eq!(resolver.resolve("System Issue"), "System Issue");
    }

    #[test]
    fn test_record_deserializes_camel_case_history() {
        let record: ActivityRecord = serde_json::from_value(serde_json::json!({
            "action": "updateItem",
            "object_id": 7,
            "creation_date": "2020-10-11T10:00:00",
            "details": {"history": [
                {"field": "issueType", "oldValue": "ti001", "newValue": "pb001"}
            ]}
        }))
        .unwrap();
        assert_eq!(record.entity, "");
        assert_eq!(record.details.history[0].old_value, "ti001");
        assert_eq!(record.history_for(FIELD_ISSUE_TYPE).count(), 1);
    }
}
