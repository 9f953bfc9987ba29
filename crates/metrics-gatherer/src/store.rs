//! Typed reads and writes on top of [`MetricsStore`].

use crate::error::GathererResult;
use crate::es_client::{
    BulkDocument, MetricsStore, AA_STATS_INDEX, ALL_INDICES, DONE_TASKS_INDEX, STATS_INDEX,
};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use metrics_core::metrics::DATETIME_FORMAT;
use metrics_core::{DailyMetricsRow, MetricsDocument, ModelType, RunRecord};
use serde_json::{json, Value};
use tracing::{debug, error, warn};

/// Run records fetched per project window.
const RUN_RECORDS_LIMIT: usize = 10_000;
/// Metric documents fetched per retirement window.
const METRIC_DOCUMENTS_LIMIT: usize = 1_000;

const RETENTION_FIELD: &str = "gather_date";

/// `range` on `field` over `[start, end]` combined with a `project_id` term.
pub fn project_window_query(
    project_id: i64,
    field: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Value {
    json!({
        "bool": {
            "filter": [
                {"range": {field: {
                    "gte": start.format(DATETIME_FORMAT).to_string(),
                    "lte": end.format(DATETIME_FORMAT).to_string(),
                }}},
                {"term": {"project_id": project_id}}
            ]
        }
    })
}

/// Analyzer run records for a project logged within the window.
pub async fn fetch_run_records(
    store: &dyn MetricsStore,
    project_id: i64,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> GathererResult<Vec<RunRecord>> {
    let query = project_window_query(project_id, "gather_datetime", start, end);
    let sources = store.search(AA_STATS_INDEX, query, RUN_RECORDS_LIMIT).await?;
    Ok(sources
        .into_iter()
        .filter_map(|source| match serde_json::from_value(source) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(project_id, error = %err, "Skipping malformed run record");
                None
            }
        })
        .collect())
}

/// Stored metric documents a retirement policy evaluates.
pub async fn fetch_metric_documents(
    store: &dyn MetricsStore,
    model_type: ModelType,
    project_id: i64,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> GathererResult<Vec<MetricsDocument>> {
    let query = project_window_query(project_id, model_type.window_field(), start, end);
    let sources = store
        .search(model_type.metrics_index(), query, METRIC_DOCUMENTS_LIMIT)
        .await?;
    Ok(sources
        .into_iter()
        .filter_map(|source| match source {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect())
}

/// Upsert daily rows by their `{project_id}_{date}` id.
pub async fn write_daily_rows(
    store: &dyn MetricsStore,
    rows: &[DailyMetricsRow],
) -> GathererResult<usize> {
    let docs = rows
        .iter()
        .map(|row| Ok(BulkDocument::with_id(row.document_id(), serde_json::to_value(row)?)))
        .collect::<GathererResult<Vec<_>>>()?;
    store.bulk_index(STATS_INDEX, docs).await
}

/// Whether a cycle already completed for `date`.
pub async fn is_date_gathered(store: &dyn MetricsStore, date: NaiveDate) -> GathererResult<bool> {
    let query = json!({
        "bool": {"filter": [
            {"term": {"gather_date": date.format("%Y-%m-%d").to_string()}}
        ]}
    });
    Ok(!store.search(DONE_TASKS_INDEX, query, 1).await?.is_empty())
}

/// Record that the cycle for `date` completed.
pub async fn mark_date_gathered(
    store: &dyn MetricsStore,
    date: NaiveDate,
    started_at: NaiveDateTime,
) -> GathererResult<()> {
    let doc = json!({
        "gather_date": date.format("%Y-%m-%d").to_string(),
        "started_task_time": started_at.format(DATETIME_FORMAT).to_string(),
    });
    store.bulk_index(DONE_TASKS_INDEX, vec![BulkDocument::new(doc)]).await?;
    Ok(())
}

/// Delete everything older than `max_days_store` days before `today` from
/// every owned index. Failures are logged per index and do not stop the rest.
/// A period that is not positive or overflows the calendar deletes nothing.
pub async fn delete_old_info(store: &dyn MetricsStore, today: NaiveDate, max_days_store: i64) -> u64 {
    let cutoff = match Duration::try_days(max_days_store)
        .filter(|_| max_days_store > 0)
        .and_then(|keep| today.checked_sub_signed(keep))
    {
        Some(cutoff) => cutoff,
        None => {
            error!(max_days_store, %today, "Retention period out of range, skipping old info deletion");
            return 0;
        }
    };
    let mut deleted = 0;
    for index in ALL_INDICES {
        match store.delete_older_than(index, RETENTION_FIELD, cutoff).await {
            Ok(count) => {
                debug!(index, count, %cutoff, "Finished deleting old info");
                deleted += count;
            }
            Err(err) => error!(index, error = %err, "Couldn't delete old info"),
        }
    }
    deleted
}
