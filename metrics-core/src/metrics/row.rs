//! The daily metrics document written once per (project, day).

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Score stored when nothing was analyzed on a day.
pub const PERFECT_SCORE: f64 = 100.0;

/// `"YYYY-MM-DD HH:MM:SS"`, the layout the metrics store maps as a date.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One day of auto-analysis metrics for one project.
///
/// Serialized field names are the stored document's column names; dashboards
/// and retirement rules select columns by those names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMetricsRow {
    pub project_id: i64,
    pub project_name: String,
    pub gather_date: NaiveDate,
    #[serde(with = "store_datetime")]
    pub gather_datetime: NaiveDateTime,
    /// 1 when auto-analysis was enabled for the project that day.
    pub on: u8,
    #[serde(rename = "AA_analyzed")]
    pub aa_analyzed: u64,
    pub changed_type: u64,
    pub accuracy: f64,
    #[serde(rename = "f1-score")]
    pub f1_score: f64,
    pub launch_analyzed: u64,
    pub manually_analyzed: u64,
    pub launch_added: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent_not_found_aa: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_processing_time_only_found_test_item_aa: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_processing_time_test_item_aa: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent_not_found_suggest: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_processing_time_test_item_suggest: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent_not_found_cluster: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_processing_time_test_item_cluster: Option<f64>,
    #[serde(default)]
    pub model_info: Vec<String>,
    #[serde(default)]
    pub module_version: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub errors_count: u64,
}

impl DailyMetricsRow {
    /// Empty row for a project and day, before any activity is folded in.
    pub fn template(
        project_id: i64,
        project_name: &str,
        gather_date: NaiveDate,
        gathered_at: NaiveDateTime,
    ) -> Self {
        Self {
            project_id,
            project_name: project_name.to_string(),
            gather_date,
            gather_datetime: gathered_at,
            on: 0,
            aa_analyzed: 0,
            changed_type: 0,
            accuracy: PERFECT_SCORE,
            f1_score: PERFECT_SCORE,
            launch_analyzed: 0,
            manually_analyzed: 0,
            launch_added: 0,
            percent_not_found_aa: None,
            avg_processing_time_only_found_test_item_aa: None,
            avg_processing_time_test_item_aa: None,
            percent_not_found_suggest: None,
            avg_processing_time_test_item_suggest: None,
            percent_not_found_cluster: None,
            avg_processing_time_test_item_cluster: None,
            model_info: Vec::new(),
            module_version: Vec::new(),
            errors: Vec::new(),
            errors_count: 0,
        }
    }

    /// Deterministic document id so a rerun overwrites the same day.
    pub fn document_id(&self) -> String {
        document_id(self.project_id, self.gather_date)
    }

    /// Raise `launch_analyzed` to `count` if it is higher; never lowers it.
    pub fn merge_launch_analyzed(&mut self, count: u64) {
        self.launch_analyzed = self.launch_analyzed.max(count);
    }
}

/// `"{project_id}_{YYYY-MM-DD}"`.
pub fn document_id(project_id: i64, gather_date: NaiveDate) -> String {
    format!("{}_{}", project_id, gather_date.format("%Y-%m-%d"))
}

pub mod store_datetime {
    //! Serde adapter for [`super::DATETIME_FORMAT`].

    use super::DATETIME_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.format(DATETIME_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, DATETIME_FORMAT).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 10, d).unwrap()
    }

    #[test]
    fn test_same_project_and_day_share_document_id() {
        let first = DailyMetricsRow::template(7, "alpha", day(13), day(13).and_hms_opt(1, 0, 0).unwrap());
        let mut rerun =
            DailyMetricsRow::template(7, "alpha", day(13), day(14).and_hms_opt(9, 30, 0).unwrap());
        rerun.aa_analyzed = 4;

        assert_eq!(first.document_id(), "7_2020-10-13");
        assert_eq!(first.document_id(), rerun.document_id());
        assert_ne!(first.document_id(), document_id(7, day(14)));
    }

    #[test]
    fn test_row_serializes_store_column_names() {
        let row = DailyMetricsRow::template(1, "p", day(10), day(10).and_hms_opt(23, 5, 1).unwrap());
        let json = serde_json::to_value(&row).unwrap();

        assert_eq!(json["gather_date"], "2020-10-10");
        assert_eq!(json["gather_datetime"], "2020-10-10 23:05:01");
        assert_eq!(json["f1-score"], 100.0);
        assert_eq!(json["AA_analyzed"], 0);
        assert!(json.get("percent_not_found_aa").is_none());

        let back: DailyMetricsRow = serde_json::from_value(json).unwrap();
        assert_eq!(back, row);
    }

    #[test]
    fn test_merge_launch_analyzed_never_decreases() {
        let mut row = DailyMetricsRow::template(1, "p", day(10), day(10).and_hms_opt(0, 0, 0).unwrap());
        row.merge_launch_analyzed(5);
        row.merge_launch_analyzed(2);
        assert_eq!(row.launch_analyzed, 5);
    }
}
