//! Read-only access to the test-reporting database.
//!
//! ```text
//! project ──► activity (issue changes, analyzer toggles)
//!        └──► launch ──► test_item (item → launch)
//!        └──► project_attribute (analyzer.isAutoAnalyzerEnabled)
//!        └──► issue_type_project ──► issue_type (name → locator)
//! ```

use crate::config::PostgresConfig;
use crate::error::GathererResult;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use metrics_core::activity::types::FIELD_AUTO_ANALYZER_ENABLED;
use metrics_core::{ActivityDetails, ActivityRecord, IssueTypeResolver};
use serde_json::Value;
use std::collections::HashMap;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, warn};

const PROJECTS_SQL: &str = "select id, name from project order by id";

const ACTIVITIES_SQL: &str = "select entity, action, details, object_id, creation_date \
     from activity \
     where project_id = $1 and creation_date >= $2 and creation_date <= $3 \
     order by creation_date";

const LAUNCH_IDS_SQL: &str =
    "select item_id, launch_id from test_item where item_id = any($1)";

const AUTO_ANALYSIS_FLAG_SQL: &str = "select pa.value \
     from project_attribute pa \
     join attribute a on a.id = pa.attribute_id \
     where pa.project_id = $1 and a.name = $2";

const ISSUE_TYPES_SQL: &str = "select it.issue_name, it.locator \
     from issue_type it \
     join issue_type_project itp on itp.issue_type_id = it.id \
     where itp.project_id = $1";

const LAUNCHES_ADDED_SQL: &str = "select count(distinct id) from launch \
     where project_id = $1 and start_time >= $2 and start_time < $3";

/// Item ids sent per `any($1)` lookup.
const LAUNCH_LOOKUP_BATCH: usize = 1_000;

/// A project as listed in the reporting database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectInfo {
    pub id: i64,
    pub name: String,
}

/// Everything the gatherer reads from the reporting database.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProjectSource: Send + Sync {
    async fn projects(&self) -> GathererResult<Vec<ProjectInfo>>;

    /// Activity records of a project created within `[start, end]`, oldest first.
    async fn activities(
        &self,
        project_id: i64,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> GathererResult<Vec<ActivityRecord>>;

    /// Launch of each item that has one.
    async fn launch_ids(&self, item_ids: Vec<i64>) -> GathererResult<HashMap<i64, i64>>;

    /// Current value of the project's auto-analysis setting.
    async fn auto_analysis_enabled(&self, project_id: i64) -> GathererResult<bool>;

    /// Issue-type name to locator map for the project.
    async fn issue_types(&self, project_id: i64) -> GathererResult<IssueTypeResolver>;

    /// Launches started within `[start, end)`.
    async fn launches_added(
        &self,
        project_id: i64,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> GathererResult<u64>;
}

/// Build an activity record from raw columns. Rows without an object id
/// carry nothing the metrics use and are dropped.
pub fn activity_from_columns(
    entity: Option<String>,
    action: String,
    details: Option<Value>,
    object_id: Option<i64>,
    creation_date: NaiveDateTime,
) -> Option<ActivityRecord> {
    let object_id = object_id?;
    let details = match details {
        Some(value) => serde_json::from_value::<ActivityDetails>(value).unwrap_or_else(|err| {
            warn!(object_id, error = %err, "Unreadable activity details");
            ActivityDetails::default()
        }),
        None => ActivityDetails::default(),
    };
    Some(ActivityRecord {
        entity: entity.unwrap_or_default(),
        action,
        object_id,
        creation_date,
        details,
    })
}

/// `"true"` in any case; everything else, including a missing row, is off.
pub fn parse_enabled_flag(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}

/// Postgres-backed [`ProjectSource`] over one connection.
pub struct PostgresDao {
    client: Client,
}

impl PostgresDao {
    pub async fn connect(config: &PostgresConfig) -> GathererResult<Self> {
        let (client, connection) = tokio_postgres::connect(&config.connection_string(), NoTls).await?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!(error = %err, "Postgres connection closed with error");
            }
        });
        debug!(host = %config.host, database = %config.database, "Connected to Postgres");
        Ok(Self { client })
    }

    /// `SELECT 1` round trip.
    pub async fn ping(&self) -> GathererResult<()> {
        self.client.simple_query("SELECT 1").await?;
        Ok(())
    }
}

#[async_trait]
impl ProjectSource for PostgresDao {
    async fn projects(&self) -> GathererResult<Vec<ProjectInfo>> {
        let rows = self.client.query(PROJECTS_SQL, &[]).await?;
        rows.iter()
            .map(|row| {
                Ok(ProjectInfo {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                })
            })
            .collect()
    }

    async fn activities(
        &self,
        project_id: i64,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> GathererResult<Vec<ActivityRecord>> {
        let rows = self
            .client
            .query(ACTIVITIES_SQL, &[&project_id, &start, &end])
            .await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let record = activity_from_columns(
                row.try_get("entity")?,
                row.try_get("action")?,
                row.try_get("details")?,
                row.try_get("object_id")?,
                row.try_get("creation_date")?,
            );
            records.extend(record);
        }
        debug!(project_id, count = records.len(), "Loaded activities");
        Ok(records)
    }

    async fn launch_ids(&self, item_ids: Vec<i64>) -> GathererResult<HashMap<i64, i64>> {
        let mut launches = HashMap::new();
        for batch in item_ids.chunks(LAUNCH_LOOKUP_BATCH) {
            let rows = self.client.query(LAUNCH_IDS_SQL, &[&batch]).await?;
            for row in &rows {
                let item_id: i64 = row.try_get("item_id")?;
                if let Some(launch_id) = row.try_get::<_, Option<i64>>("launch_id")? {
                    launches.insert(item_id, launch_id);
                }
            }
        }
        Ok(launches)
    }

    async fn auto_analysis_enabled(&self, project_id: i64) -> GathererResult<bool> {
        let row = self
            .client
            .query_opt(AUTO_ANALYSIS_FLAG_SQL, &[&project_id, &FIELD_AUTO_ANALYZER_ENABLED])
            .await?;
        let value = match row {
            Some(row) => row.try_get::<_, Option<String>>("value")?,
            None => None,
        };
        Ok(parse_enabled_flag(value.as_deref()))
    }

    async fn issue_types(&self, project_id: i64) -> GathererResult<IssueTypeResolver> {
        let rows = self.client.query(ISSUE_TYPES_SQL, &[&project_id]).await?;
        rows.iter()
            .map(|row| Ok((row.try_get("issue_name")?, row.try_get("locator")?)))
            .collect()
    }

    async fn launches_added(
        &self,
        project_id: i64,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> GathererResult<u64> {
        let row = self
            .client
            .query_one(LAUNCHES_ADDED_SQL, &[&project_id, &start, &end])
            .await?;
        let count: i64 = row.try_get(0)?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 10, 15)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_activity_from_columns_reads_history() {
        let details = json!({"history": [
            {"field": "issueType", "oldValue": "To Investigate", "newValue": "Product Bug"}
        ]});
        let record = activity_from_columns(
            Some("testItem".into()),
            "analyzeItem".into(),
            Some(details),
            Some(42),
            noon(),
        )
        .unwrap();
        assert_eq!(record.object_id, 42);
        assert_eq!(record.details.history[0].new_value, "Product Bug");
    }

    #[test]
    fn test_activity_from_columns_tolerates_bad_details() {
        let record =
            activity_from_columns(None, "updateItem".into(), Some(json!("text")), Some(1), noon())
                .unwrap();
        assert!(record.details.history.is_empty());
        assert_eq!(record.entity, "");

        assert!(activity_from_columns(None, "updateItem".into(), None, None, noon()).is_none());
    }

    #[test]
    fn test_parse_enabled_flag() {
        assert!(parse_enabled_flag(Some("true")));
        assert!(parse_enabled_flag(Some(" TRUE ")));
        assert!(!parse_enabled_flag(Some("false")));
        assert!(!parse_enabled_flag(None));
    }
}
