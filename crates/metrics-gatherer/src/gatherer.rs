//! Metrics gatherer: one sweep over every project for a date range.
//!
//! ```text
//! for project:
//!     for day in range:
//!         activities(day - 7 .. day + 1) ──► timeline.observe
//!         template ◄── AA flag, run stats, launches added
//!         accumulate(chain) ──► row
//!     timeline.apply(rows) ──► write rows ──► models remover
//! ```
//!
//! A failing project is logged and skipped; the sweep continues with the next.

use crate::error::GathererResult;
use crate::es_client::MetricsStore;
use crate::models_remover::ModelsRemover;
use crate::postgres_dao::{ProjectInfo, ProjectSource};
use crate::store;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use metrics_core::{
    accumulate, analyzed_items, build_activity_chain, days_in_range, fold_operational_stats,
    trailing_window, DailyMetricsRow, FeatureStateTimeline, IssueTypeResolver,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

/// What a sweep produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSummary {
    pub projects_total: usize,
    pub projects_gathered: usize,
    pub rows_written: usize,
    pub failed_projects: Vec<i64>,
}

/// Gathers daily rows for all projects and hands each project to the
/// models remover once its rows are stored.
pub struct MetricsGatherer<'a> {
    projects: &'a dyn ProjectSource,
    store: &'a dyn MetricsStore,
    remover: Option<&'a ModelsRemover<'a>>,
}

impl<'a> MetricsGatherer<'a> {
    pub fn new(projects: &'a dyn ProjectSource, store: &'a dyn MetricsStore) -> Self {
        Self {
            projects,
            store,
            remover: None,
        }
    }

    /// Run retirement policies after each project's rows are written.
    pub fn with_remover(mut self, remover: &'a ModelsRemover<'a>) -> Self {
        self.remover = Some(remover);
        self
    }

    /// Gather `[from, to]` for every project.
    pub async fn gather_metrics(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        gathered_at: NaiveDateTime,
    ) -> GathererResult<SweepSummary> {
        let projects = self.projects.projects().await?;
        let days = days_in_range(from, to);
        info!(projects = projects.len(), %from, %to, "Started gathering metrics");

        let mut summary = SweepSummary {
            projects_total: projects.len(),
            ..SweepSummary::default()
        };
        for project in &projects {
            match self.gather_project(project, &days, gathered_at).await {
                Ok(written) => {
                    summary.projects_gathered += 1;
                    summary.rows_written += written;
                }
                Err(err) => {
                    error!(project_id = project.id, error = %err, "Failed to gather project metrics");
                    summary.failed_projects.push(project.id);
                }
            }
        }

        info!(
            gathered = summary.projects_gathered,
            failed = summary.failed_projects.len(),
            rows = summary.rows_written,
            "Finished gathering metrics"
        );
        Ok(summary)
    }

    /// Rows for one project over `days`, stored and then run through the
    /// retirement policies. Returns the number of rows written.
    pub async fn gather_project(
        &self,
        project: &ProjectInfo,
        days: &[NaiveDate],
        gathered_at: NaiveDateTime,
    ) -> GathererResult<usize> {
        let rows = self.project_rows(project, days, gathered_at).await?;
        let written = store::write_daily_rows(self.store, &rows).await?;
        debug!(project_id = project.id, rows = written, "Stored daily rows");

        if let Some(remover) = self.remover {
            remover.apply_policies(project.id, gathered_at).await;
        }
        Ok(written)
    }

    /// Compute rows for `days` without storing them.
    pub async fn project_rows(
        &self,
        project: &ProjectInfo,
        days: &[NaiveDate],
        gathered_at: NaiveDateTime,
    ) -> GathererResult<Vec<DailyMetricsRow>> {
        let enabled = self.projects.auto_analysis_enabled(project.id).await?;
        let issue_types = self.projects.issue_types(project.id).await?;

        let mut timeline = FeatureStateTimeline::new();
        let mut rows = Vec::with_capacity(days.len());
        for &day in days {
            let row = self
                .day_row(project, day, enabled, &issue_types, &mut timeline, gathered_at)
                .await?;
            rows.push(row);
        }
        timeline.apply(&mut rows);
        Ok(rows)
    }

    async fn day_row(
        &self,
        project: &ProjectInfo,
        day: NaiveDate,
        enabled: bool,
        issue_types: &IssueTypeResolver,
        timeline: &mut FeatureStateTimeline,
        gathered_at: NaiveDateTime,
    ) -> GathererResult<DailyMetricsRow> {
        let (start, end) = trailing_window(day);
        let activities = self.projects.activities(project.id, start, end).await?;
        timeline.observe(&activities);

        let mut row = DailyMetricsRow::template(project.id, &project.name, day, gathered_at);
        row.on = u8::from(enabled);

        let runs = store::fetch_run_records(self.store, project.id, start, end).await?;
        fold_operational_stats(&runs).apply_to(&mut row);

        let day_start = day.and_time(NaiveTime::MIN);
        row.launch_added = self
            .projects
            .launches_added(project.id, day_start, day_start + Duration::days(1))
            .await?;

        let chain = build_activity_chain(&activities, issue_types);
        let launches = self.projects.launch_ids(analyzed_items(&chain)).await?;
        let row = accumulate(&chain, row, |item| launches.get(&item).copied());

        debug!(
            project_id = project.id,
            %day,
            analyzed = row.aa_analyzed,
            changed = row.changed_type,
            accuracy = row.accuracy,
            "Computed daily row"
        );
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GathererError;
    use crate::es_client::MockMetricsStore;
    use crate::postgres_dao::MockProjectSource;
    use std::collections::HashMap;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 10, d).unwrap()
    }

    fn quiet_source(projects: Vec<ProjectInfo>) -> MockProjectSource {
        let mut source = MockProjectSource::new();
        source.expect_projects().returning(move || Ok(projects.clone()));
        source.expect_auto_analysis_enabled().returning(|_| Ok(true));
        source
            .expect_issue_types()
            .returning(|_| Ok(IssueTypeResolver::default()));
        source.expect_activities().returning(|_, _, _| Ok(Vec::new()));
        source.expect_launches_added().returning(|_, _, _| Ok(3));
        source.expect_launch_ids().returning(|_| Ok(HashMap::new()));
        source
    }

    #[tokio::test]
    async fn test_quiet_project_gets_perfect_rows() {
        let source = quiet_source(vec![ProjectInfo { id: 1, name: "p".into() }]);
        let mut store = MockMetricsStore::new();
        store.expect_search().returning(|_, _, _| Ok(Vec::new()));

        let gatherer = MetricsGatherer::new(&source, &store);
        let project = ProjectInfo { id: 1, name: "p".into() };
        let rows = gatherer
            .project_rows(&project, &[day(14), day(15)], day(15).and_hms_opt(23, 0, 0).unwrap())
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert_eq!(row.on, 1);
            assert_eq!(row.accuracy, 100.0);
            assert_eq!(row.f1_score, 100.0);
            assert_eq!(row.launch_added, 3);
            assert_eq!(row.percent_not_found_aa, None);
        }
    }

    #[tokio::test]
    async fn test_failing_project_does_not_stop_sweep() {
        let source = quiet_source(vec![
            ProjectInfo { id: 1, name: "broken".into() },
            ProjectInfo { id: 2, name: "fine".into() },
        ]);
        let mut store = MockMetricsStore::new();
        store.expect_search().returning(|_, _, _| Ok(Vec::new()));
        store.expect_bulk_index().returning(|index, docs| {
            if docs[0].source["project_id"] == 1 {
                Err(GathererError::elastic(index, "bulk", "cluster_block_exception"))
            } else {
                Ok(docs.len())
            }
        });

        let gatherer = MetricsGatherer::new(&source, &store);
        let summary = gatherer
            .gather_metrics(day(15), day(15), day(15).and_hms_opt(23, 0, 0).unwrap())
            .await
            .unwrap();

        assert_eq!(summary.projects_total, 2);
        assert_eq!(summary.projects_gathered, 1);
        assert_eq!(summary.rows_written, 1);
        assert_eq!(summary.failed_projects, vec![1]);
    }
}
