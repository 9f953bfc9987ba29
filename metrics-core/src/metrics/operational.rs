//! Operational statistics folded from per-run analyzer records.
//!
//! The analyzer logs one record per auto-analysis, suggestion or clustering
//! run. Runs are bucketed by method and averaged per bucket.

use super::row::DailyMetricsRow;
use super::scoring::{round_to, round_whole};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// One analyzer invocation as logged in the run-statistics index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub method: String,
    #[serde(default)]
    pub items_to_process: u64,
    #[serde(default)]
    pub not_found: u64,
    #[serde(default)]
    pub processed_time: f64,
    #[serde(default)]
    pub launch_id: Option<i64>,
    #[serde(default)]
    pub model_info: Vec<String>,
    #[serde(default)]
    pub module_version: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub errors_count: u64,
}

/// Analyzer methods with their own row columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunMethod {
    AutoAnalysis,
    Suggest,
    FindClusters,
}

impl RunMethod {
    pub fn parse(method: &str) -> Option<Self> {
        match method {
            "auto_analysis" => Some(Self::AutoAnalysis),
            "suggest" => Some(Self::Suggest),
            "find_clusters" => Some(Self::FindClusters),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoAnalysis => "auto_analysis",
            Self::Suggest => "suggest",
            Self::FindClusters => "find_clusters",
        }
    }
}

/// Running sums for one method.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct MethodTotals {
    runs: u32,
    percent_not_found: f64,
    time_per_found_item: f64,
    time_per_item: f64,
}

impl MethodTotals {
    fn add(&mut self, run: &RunRecord) {
        let items = run.items_to_process as f64;
        let found = (run.items_to_process as i64 - run.not_found as i64).max(1) as f64;
        self.runs += 1;
        self.percent_not_found += round_whole(run.not_found as f64 / items * 100.0);
        self.time_per_found_item += run.processed_time / found;
        self.time_per_item += run.processed_time / items;
    }

    /// `(percent_not_found, time_per_found_item, time_per_item)` averaged over runs.
    fn averages(&self) -> Option<(f64, f64, f64)> {
        if self.runs == 0 {
            return None;
        }
        let n = self.runs as f64;
        Some((
            round_whole(self.percent_not_found / n),
            round_to(self.time_per_found_item / n, 2),
            round_to(self.time_per_item / n, 2),
        ))
    }
}

/// Partial row produced from a day's run records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationalStats {
    pub percent_not_found_aa: Option<f64>,
    pub avg_processing_time_only_found_test_item_aa: Option<f64>,
    pub avg_processing_time_test_item_aa: Option<f64>,
    pub percent_not_found_suggest: Option<f64>,
    pub avg_processing_time_test_item_suggest: Option<f64>,
    pub percent_not_found_cluster: Option<f64>,
    pub avg_processing_time_test_item_cluster: Option<f64>,
    pub model_info: Vec<String>,
    pub module_version: Vec<String>,
    pub errors: Vec<String>,
    pub errors_count: u64,
    /// Distinct launches seen in auto-analysis runs.
    pub launch_analyzed: u64,
}

impl OperationalStats {
    /// Copy every computed column into `row`; `launch_analyzed` merges by maximum.
    pub fn apply_to(self, row: &mut DailyMetricsRow) {
        row.percent_not_found_aa = self.percent_not_found_aa;
        row.avg_processing_time_only_found_test_item_aa =
            self.avg_processing_time_only_found_test_item_aa;
        row.avg_processing_time_test_item_aa = self.avg_processing_time_test_item_aa;
        row.percent_not_found_suggest = self.percent_not_found_suggest;
        row.avg_processing_time_test_item_suggest = self.avg_processing_time_test_item_suggest;
        row.percent_not_found_cluster = self.percent_not_found_cluster;
        row.avg_processing_time_test_item_cluster = self.avg_processing_time_test_item_cluster;
        row.model_info = self.model_info;
        row.module_version = self.module_version;
        row.errors = self.errors;
        row.errors_count = self.errors_count;
        row.merge_launch_analyzed(self.launch_analyzed);
    }
}

fn push_unique(target: &mut Vec<String>, values: &[String]) {
    for value in values {
        if !target.contains(value) {
            target.push(value.clone());
        }
    }
}

/// Fold run records into per-method averages.
///
/// Runs with nothing to process and runs of unknown methods are ignored.
/// The only-found processing time is reported for auto-analysis runs only;
/// suggestions and clustering have no "found" notion in the dashboards.
pub fn fold_operational_stats(runs: &[RunRecord]) -> OperationalStats {
    let mut aa = MethodTotals::default();
    let mut suggest = MethodTotals::default();
    let mut clusters = MethodTotals::default();
    let mut aa_launches = HashSet::new();
    let mut stats = OperationalStats::default();

    for run in runs.iter().filter(|r| r.items_to_process > 0) {
        let Some(method) = RunMethod::parse(&run.method) else {
            debug!(method = %run.method, "Ignoring run of unknown method");
            continue;
        };
        match method {
            RunMethod::AutoAnalysis => {
                aa.add(run);
                if let Some(launch_id) = run.launch_id {
                    aa_launches.insert(launch_id);
                }
            }
            RunMethod::Suggest => suggest.add(run),
            RunMethod::FindClusters => clusters.add(run),
        }
        push_unique(&mut stats.model_info, &run.model_info);
        push_unique(&mut stats.module_version, &run.module_version);
        stats.errors.extend(run.errors.iter().cloned());
        stats.errors_count += run.errors_count;
    }

    if let Some((percent, per_found, per_item)) = aa.averages() {
        stats.percent_not_found_aa = Some(percent);
        stats.avg_processing_time_only_found_test_item_aa = Some(per_found);
        stats.avg_processing_time_test_item_aa = Some(per_item);
    }
    if let Some((percent, _, per_item)) = suggest.averages() {
        stats.percent_not_found_suggest = Some(percent);
        stats.avg_processing_time_test_item_suggest = Some(per_item);
    }
    if let Some((percent, _, per_item)) = clusters.averages() {
        stats.percent_not_found_cluster = Some(percent);
        stats.avg_processing_time_test_item_cluster = Some(per_item);
    }
    stats.launch_analyzed = aa_launches.len() as u64;
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(method: &str, items: u64, not_found: u64, launch: i64, time: f64) -> RunRecord {
        RunRecord {
            method: method.to_string(),
            items_to_process: items,
            not_found,
            processed_time: time,
            launch_id: Some(launch),
            model_info: vec!["global_model".to_string()],
            module_version: vec!["1.1.1".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_fold_buckets_by_method() {
        let stats = fold_operational_stats(&[
            run("auto_analysis", 10, 1, 123, 0.8),
            run("suggest", 12, 3, 123, 0.9),
            run("suggest", 5, 8, 125, 0.4),
            run("find_clusters", 6, 1, 126, 0.8),
        ]);

        assert_eq!(stats.percent_not_found_aa, Some(10.0));
        assert_eq!(stats.avg_processing_time_only_found_test_item_aa, Some(0.09));
        assert_eq!(stats.avg_processing_time_test_item_aa, Some(0.08));
        assert_eq!(stats.percent_not_found_suggest, Some(92.0));
        assert_eq!(stats.avg_processing_time_test_item_suggest, Some(0.08));
        assert_eq!(stats.percent_not_found_cluster, Some(17.0));
        assert_eq!(stats.avg_processing_time_test_item_cluster, Some(0.13));
        assert_eq!(stats.model_info, vec!["global_model".to_string()]);
        assert_eq!(stats.module_version, vec!["1.1.1".to_string()]);
        assert_eq!(stats.launch_analyzed, 1);
    }

    #[test]
    fn test_fold_skips_empty_runs_and_unknown_methods() {
        let stats = fold_operational_stats(&[
            run("auto_analysis", 0, 0, 1, 0.5),
            run("train_models", 4, 0, 2, 0.5),
        ]);
        assert_eq!(stats, OperationalStats::default());
    }

    #[test]
    fn test_fold_floors_found_divisor_at_one() {
        let stats = fold_operational_stats(&[run("auto_analysis", 3, 3, 1, 0.6)]);
        assert_eq!(stats.percent_not_found_aa, Some(100.0));
        assert_eq!(stats.avg_processing_time_only_found_test_item_aa, Some(0.6));
        assert_eq!(stats.avg_processing_time_test_item_aa, Some(0.2));
    }

    #[test]
    fn test_fold_concatenates_errors() {
        let mut first = run("suggest", 2, 0, 1, 0.1);
        first.errors = vec!["timeout".to_string()];
        first.errors_count = 1;
        let mut second = run("find_clusters", 2, 0, 1, 0.1);
        second.errors = vec!["timeout".to_string(), "oom".to_string()];
        second.errors_count = 2;
        second.module_version = vec!["1.1.2".to_string()];

        let stats = fold_operational_stats(&[first, second]);

        assert_eq!(stats.errors, vec!["timeout", "timeout", "oom"]);
        assert_eq!(stats.errors_count, 3);
        assert_eq!(stats.module_version, vec!["1.1.1", "1.1.2"]);
        assert_eq!(stats.launch_analyzed, 0);
    }
}
