//! Cycle tests: a scheduled cycle against in-memory backends.
//!
//! Tests verify:
//! - A cycle stores the day's row with chain, run and launch metrics
//! - A model meeting its retirement conditions is removed and audited
//! - Blank model folders are skipped without an audit
//! - Retention drops old documents and the done marker blocks a rerun

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use metrics_core::{
    ActivityDetails, ActivityRecord, HistoryEntry, IssueTypeResolver, ModelType, RetirementEngine,
};
use metrics_gatherer::es_client::{
    AA_STATS_INDEX, DONE_TASKS_INDEX, MODEL_REMOVE_STATS_INDEX, STATS_INDEX,
};
use metrics_gatherer::{
    run_cycle, BulkDocument, CycleBackends, CycleOutcome, GathererConfig, GathererResult,
    MetricsStore, ModelService, ProjectInfo, ProjectSource,
};
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;

fn at(d: u32, h: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2020, 10, d)
        .unwrap()
        .and_hms_opt(h, 0, 0)
        .unwrap()
}

// ── in-memory store ──────────────────────────────────────────────

#[derive(Default)]
struct MemoryStore {
    indices: Mutex<HashMap<String, Vec<BulkDocument>>>,
}

impl MemoryStore {
    fn seed(&self, index: &str, source: Value) {
        self.indices
            .lock()
            .unwrap()
            .entry(index.to_string())
            .or_default()
            .push(BulkDocument::new(source));
    }

    fn sources(&self, index: &str) -> Vec<Value> {
        self.indices
            .lock()
            .unwrap()
            .get(index)
            .map(|docs| docs.iter().map(|d| d.source.clone()).collect())
            .unwrap_or_default()
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.as_str().cmp(b.as_str())),
        _ => left.as_f64()?.partial_cmp(&right.as_f64()?),
    }
}

fn matches(doc: &Value, query: &Value) -> bool {
    let filters = query["bool"]["filter"].as_array().cloned().unwrap_or_default();
    filters.iter().all(|filter| {
        if let Some(term) = filter["term"].as_object() {
            return term.iter().all(|(field, value)| &doc[field] == value);
        }
        if let Some(range) = filter["range"].as_object() {
            return range.iter().all(|(field, bounds)| {
                let value = &doc[field];
                let lower = bounds
                    .get("gte")
                    .map_or(true, |b| matches!(compare(value, b), Some(Ordering::Greater | Ordering::Equal)));
                let upper = bounds
                    .get("lte")
                    .map_or(true, |b| matches!(compare(value, b), Some(Ordering::Less | Ordering::Equal)));
                lower && upper
            });
        }
        true
    })
}

#[async_trait]
impl MetricsStore for MemoryStore {
    async fn bulk_index(&self, index: &str, docs: Vec<BulkDocument>) -> GathererResult<usize> {
        let mut indices = self.indices.lock().unwrap();
        let stored = indices.entry(index.to_string()).or_default();
        let count = docs.len();
        for doc in docs {
            match &doc.id {
                Some(id) => {
                    stored.retain(|d| d.id.as_deref() != Some(id.as_str()));
                    stored.push(doc);
                }
                None => stored.push(doc),
            }
        }
        Ok(count)
    }

    async fn search(&self, index: &str, query: Value, size: usize) -> GathererResult<Vec<Value>> {
        Ok(self
            .sources(index)
            .into_iter()
            .filter(|doc| matches(doc, &query))
            .take(size)
            .collect())
    }

    async fn delete_older_than(
        &self,
        index: &str,
        field: &str,
        cutoff: NaiveDate,
    ) -> GathererResult<u64> {
        let cutoff = json!(cutoff.format("%Y-%m-%d").to_string());
        let mut indices = self.indices.lock().unwrap();
        let Some(stored) = indices.get_mut(index) else {
            return Ok(0);
        };
        let before = stored.len();
        stored.retain(|doc| {
            !matches!(
                compare(&doc.source[field], &cutoff),
                Some(Ordering::Less | Ordering::Equal)
            )
        });
        Ok((before - stored.len()) as u64)
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

// ── reporting database ───────────────────────────────────────────

struct FakeProjects {
    activities: Vec<ActivityRecord>,
    launches: HashMap<i64, i64>,
}

#[async_trait]
impl ProjectSource for FakeProjects {
    async fn projects(&self) -> GathererResult<Vec<ProjectInfo>> {
        Ok(vec![ProjectInfo {
            id: 1,
            name: "demo".to_string(),
        }])
    }

    async fn activities(
        &self,
        _project_id: i64,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> GathererResult<Vec<ActivityRecord>> {
        Ok(self
            .activities
            .iter()
            .filter(|r| r.creation_date >= start && r.creation_date <= end)
            .cloned()
            .collect())
    }

    async fn launch_ids(&self, item_ids: Vec<i64>) -> GathererResult<HashMap<i64, i64>> {
        Ok(item_ids
            .into_iter()
            .filter_map(|id| self.launches.get(&id).map(|l| (id, *l)))
            .collect())
    }

    async fn auto_analysis_enabled(&self, _project_id: i64) -> GathererResult<bool> {
        Ok(true)
    }

    async fn issue_types(&self, _project_id: i64) -> GathererResult<IssueTypeResolver> {
        Ok([
            ("To Investigate", "ti001"),
            ("Product Bug", "pb001"),
            ("Automation Bug", "ab001"),
            ("System Issue", "si001"),
        ]
        .into_iter()
        .map(|(name, code)| (name.to_string(), code.to_string()))
        .collect())
    }

    async fn launches_added(
        &self,
        _project_id: i64,
        _start: NaiveDateTime,
        _end: NaiveDateTime,
    ) -> GathererResult<u64> {
        Ok(2)
    }
}

// ── model service ────────────────────────────────────────────────

#[derive(Default)]
struct FakeModels {
    removed: Mutex<Vec<(i64, ModelType)>>,
}

#[async_trait]
impl ModelService for FakeModels {
    async fn model_folder(&self, project_id: i64, model_type: ModelType) -> GathererResult<String> {
        Ok(match model_type {
            ModelType::AutoAnalysis => format!("auto_analysis_model_{}", project_id),
            ModelType::Suggest => String::new(),
        })
    }

    async fn remove_models(&self, project_id: i64, model_type: ModelType) -> GathererResult<bool> {
        self.removed.lock().unwrap().push((project_id, model_type));
        Ok(true)
    }
}

fn issue_change(object_id: i64, action: &str, old: &str, new: &str, when: NaiveDateTime) -> ActivityRecord {
    ActivityRecord {
        entity: "testItem".to_string(),
        action: action.to_string(),
        object_id,
        creation_date: when,
        details: ActivityDetails {
            history: vec![HistoryEntry::new("issueType", old, new)],
        },
    }
}

fn projects() -> FakeProjects {
    FakeProjects {
        activities: vec![
            issue_change(1, "analyzeItem", "To Investigate", "Product Bug", at(14, 10)),
            issue_change(2, "analyzeItem", "To Investigate", "System Issue", at(14, 10)),
            issue_change(1, "updateItem", "Product Bug", "Automation Bug", at(14, 11)),
        ],
        launches: HashMap::from([(1, 100), (2, 100)]),
    }
}

fn seeded_store() -> MemoryStore {
    let store = MemoryStore::default();
    store.seed(
        AA_STATS_INDEX,
        json!({
            "method": "auto_analysis",
            "project_id": 1,
            "launch_id": 100,
            "items_to_process": 4,
            "not_found": 3,
            "processed_time": 1.0,
            "module_version": ["5.0"],
            "gather_date": "2020-10-14",
            "gather_datetime": "2020-10-14 10:00:00"
        }),
    );
    store.seed(
        AA_STATS_INDEX,
        json!({"method": "auto_analysis", "project_id": 1, "gather_date": "2018-01-01"}),
    );
    store
}

#[tokio::test]
async fn test_cycle_stores_row_retires_model_and_marks_done() {
    let config = GathererConfig::default();
    let engine = RetirementEngine::new(&config.policies.auto_analysis, &config.policies.suggest);
    let projects = projects();
    let store = seeded_store();
    let models = FakeModels::default();
    let backends = CycleBackends {
        projects: &projects,
        store: &store,
        models: Some(&models),
    };

    let outcome = run_cycle(&config, &backends, &engine, at(15, 3)).await.unwrap();
    let (date, summary) = match outcome {
        CycleOutcome::Gathered { date, summary } => (date, summary),
        other => panic!("cycle did not gather: {other:?}"),
    };
    assert_eq!(date, NaiveDate::from_ymd_opt(2020, 10, 14).unwrap());
    assert_eq!(summary.rows_written, 1);

    let rows = store.sources(STATS_INDEX);
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row["gather_date"], "2020-10-14");
    assert_eq!(row["gather_datetime"], "2020-10-15 03:00:00");
    assert_eq!(row["on"], 1);
    assert_eq!(row["AA_analyzed"], 2);
    assert_eq!(row["changed_type"], 1);
    assert_eq!(row["accuracy"], 50.0);
    assert_eq!(row["f1-score"], 33.0);
    assert_eq!(row["launch_analyzed"], 1);
    assert_eq!(row["launch_added"], 2);
    assert_eq!(row["percent_not_found_aa"], 75.0);
    assert_eq!(row["module_version"], json!(["5.0"]));

    assert_eq!(
        *models.removed.lock().unwrap(),
        vec![(1, ModelType::AutoAnalysis)]
    );
    let audits = store.sources(MODEL_REMOVE_STATS_INDEX);
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0]["model_type"], "auto_analysis");
    assert_eq!(audits[0]["model_folder"], "auto_analysis_model_1");
    assert_eq!(audits[0]["metric_values"], "f1-score:33.0;percent_not_found_aa:75.0");
    assert_eq!(audits[0]["model_removed"], 1);

    let runs = store.sources(AA_STATS_INDEX);
    assert_eq!(runs.len(), 1, "retention keeps only recent run records");
    assert_eq!(runs[0]["gather_date"], "2020-10-14");

    assert_eq!(store.sources(DONE_TASKS_INDEX).len(), 1);
    let rerun = run_cycle(&config, &backends, &engine, at(15, 4)).await.unwrap();
    assert_eq!(rerun, CycleOutcome::AlreadyGathered(date));
}

#[tokio::test]
async fn test_cycle_without_model_service_only_gathers() {
    let config = GathererConfig::default();
    let engine = RetirementEngine::new(&config.policies.auto_analysis, &config.policies.suggest);
    let projects = projects();
    let store = seeded_store();
    let backends = CycleBackends {
        projects: &projects,
        store: &store,
        models: None,
    };

    let outcome = run_cycle(&config, &backends, &engine, at(15, 23)).await.unwrap();
    assert!(matches!(outcome, CycleOutcome::Gathered { .. }));
    assert_eq!(store.sources(STATS_INDEX)[0]["gather_date"], "2020-10-15");
    assert!(store.sources(MODEL_REMOVE_STATS_INDEX).is_empty());
}
