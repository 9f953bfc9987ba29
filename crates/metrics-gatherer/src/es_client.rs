//! Elasticsearch metrics store over the REST API.
//!
//! Indices are created on first write from the JSON mappings bundled under
//! `res/`. A bulk write that fails is retried exactly once, after recreating
//! the index (for recreatable indices with a mapping conflict) and clearing
//! the cluster-wide read-only block.

use crate::config::ElasticConfig;
use crate::error::{GathererError, GathererResult};
use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Daily metrics rows.
pub const STATS_INDEX: &str = "rp_stats";
/// One marker per gathered date.
pub const DONE_TASKS_INDEX: &str = "rp_done_tasks";
/// Per-run analyzer records.
pub const AA_STATS_INDEX: &str = "rp_aa_stats";
pub const MODEL_TRAIN_STATS_INDEX: &str = "rp_model_train_stats";
pub const SUGGEST_METRICS_INDEX: &str = "rp_suggestions_info_metrics";
/// Retirement audit trail.
pub const MODEL_REMOVE_STATS_INDEX: &str = "rp_model_remove_stats";

/// Every index the service owns, in retention order.
pub const ALL_INDICES: [&str; 6] = [
    STATS_INDEX,
    AA_STATS_INDEX,
    DONE_TASKS_INDEX,
    MODEL_TRAIN_STATS_INDEX,
    SUGGEST_METRICS_INDEX,
    MODEL_REMOVE_STATS_INDEX,
];

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

static URL_CREDENTIALS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<scheme>[A-Za-z][A-Za-z0-9+.\-]*://)[^@/]*@")
        .expect("URL_CREDENTIALS_RE regex should compile")
});

/// Strip `user:password@` from a URL before it reaches a log line.
pub fn redact_url(url: &str) -> String {
    URL_CREDENTIALS_RE.replace(url, "$scheme").into_owned()
}

/// Whether a mapping conflict on `index` may be fixed by dropping it.
pub fn is_recreatable(index: &str) -> bool {
    index != STATS_INDEX && index != DONE_TASKS_INDEX
}

/// Bundled mapping for one of [`ALL_INDICES`].
pub fn index_mapping(index: &str) -> GathererResult<Value> {
    let raw = match index {
        STATS_INDEX => include_str!("../res/rp_stats_mappings.json"),
        DONE_TASKS_INDEX => include_str!("../res/rp_done_tasks_mappings.json"),
        AA_STATS_INDEX => include_str!("../res/rp_aa_stats_mappings.json"),
        MODEL_TRAIN_STATS_INDEX => include_str!("../res/rp_model_train_stats_mappings.json"),
        SUGGEST_METRICS_INDEX => include_str!("../res/rp_suggestions_info_metrics_mappings.json"),
        MODEL_REMOVE_STATS_INDEX => include_str!("../res/rp_model_remove_stats_mappings.json"),
        other => {
            return Err(GathererError::Config(format!(
                "no bundled mapping for index '{}'",
                other
            )))
        }
    };
    Ok(serde_json::from_str(raw)?)
}

/// A document to bulk-index. Documents with an id overwrite any previous
/// version; documents without one get a generated id.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkDocument {
    pub id: Option<String>,
    pub source: Value,
}

impl BulkDocument {
    pub fn with_id(id: impl Into<String>, source: Value) -> Self {
        Self {
            id: Some(id.into()),
            source,
        }
    }

    pub fn new(source: Value) -> Self {
        Self { id: None, source }
    }
}

/// NDJSON body for `_bulk`.
pub fn bulk_body(index: &str, docs: &[BulkDocument]) -> GathererResult<String> {
    let mut body = String::new();
    for doc in docs {
        let action = match &doc.id {
            Some(id) => json!({"index": {"_index": index, "_id": id}}),
            None => json!({"index": {"_index": index}}),
        };
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(&doc.source)?);
        body.push('\n');
    }
    Ok(body)
}

/// One rejected item of a `_bulk` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkFailure {
    /// Position of the document in the request.
    pub position: usize,
    /// `type: reason` as reported by Elasticsearch.
    pub reason: String,
}

/// Every failed item of a `_bulk` response.
pub fn bulk_failures(response: &Value) -> Vec<BulkFailure> {
    if !response["errors"].as_bool().unwrap_or(false) {
        return Vec::new();
    }
    response["items"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .enumerate()
                .filter_map(|(position, item)| {
                    let err = item.as_object()?.values().next()?.get("error")?;
                    Some(BulkFailure {
                        position,
                        reason: format!(
                            "{}: {}",
                            err["type"].as_str().unwrap_or("unknown"),
                            err["reason"].as_str().unwrap_or("")
                        ),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Documents to send again after a partially failed `_bulk`. Items that were
/// accepted stay written unless the index was recreated in between.
pub fn retry_batch(
    docs: &[BulkDocument],
    failures: &[BulkFailure],
    index_recreated: bool,
) -> Vec<BulkDocument> {
    if index_recreated {
        return docs.to_vec();
    }
    failures
        .iter()
        .filter_map(|failure| docs.get(failure.position).cloned())
        .collect()
}

fn failures_error(index: &str, failures: &[BulkFailure]) -> GathererError {
    let reasons: Vec<&str> = failures.iter().map(|f| f.reason.as_str()).collect();
    GathererError::elastic(index, "bulk", reasons.join("; "))
}

/// `_source` of every hit in a `_search` response.
pub fn hit_sources(response: &Value) -> Vec<Value> {
    response["hits"]["hits"]
        .as_array()
        .map(|hits| hits.iter().filter_map(|h| h.get("_source").cloned()).collect())
        .unwrap_or_default()
}

/// Storage operations the gatherer needs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Index `docs`, creating the index if needed. Returns the number written.
    async fn bulk_index(&self, index: &str, docs: Vec<BulkDocument>) -> GathererResult<usize>;

    /// Sources of up to `size` documents matching `query`. A missing index
    /// yields no documents.
    async fn search(&self, index: &str, query: Value, size: usize) -> GathererResult<Vec<Value>>;

    /// Delete documents whose `field` is on or before `cutoff`.
    async fn delete_older_than(
        &self,
        index: &str,
        field: &str,
        cutoff: NaiveDate,
    ) -> GathererResult<u64>;

    async fn is_healthy(&self) -> bool;
}

/// REST client for one Elasticsearch cluster.
pub struct ElasticClient {
    host: String,
    user: String,
    password: String,
    http: reqwest::Client,
}

impl ElasticClient {
    pub fn new(config: &ElasticConfig) -> GathererResult<Self> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            host: config.host.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            http,
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.host, path.trim_start_matches('/'));
        let builder = self.http.request(method, url);
        if self.user.is_empty() {
            builder
        } else {
            builder.basic_auth(&self.user, Some(&self.password))
        }
    }

    async fn index_exists(&self, index: &str) -> GathererResult<bool> {
        let response = self.request(Method::HEAD, index).send().await?;
        Ok(response.status().is_success())
    }

    async fn create_index(&self, index: &str) -> GathererResult<()> {
        debug!(index, "Creating index");
        let body = json!({
            "settings": {"number_of_shards": 1},
            "mappings": index_mapping(index)?,
        });
        let response = self.request(Method::PUT, index).json(&body).send().await?;
        if response.status().is_success() {
            info!(index, "Created index");
            return Ok(());
        }
        let text = response.text().await?;
        if text.contains("resource_already_exists_exception") {
            return Ok(());
        }
        error!(index, host = %redact_url(&self.host), "Couldn't create index");
        Err(GathererError::elastic(index, "create index", text))
    }

    async fn delete_index(&self, index: &str) -> GathererResult<()> {
        let response = self.request(Method::DELETE, index).send().await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            debug!(index, "Deleted index");
            return Ok(());
        }
        Err(GathererError::elastic(index, "delete index", response.text().await?))
    }

    async fn put_mapping(&self, index: &str) -> GathererResult<()> {
        let response = self
            .request(Method::PUT, &format!("{}/_mapping", index))
            .json(&index_mapping(index)?)
            .send()
            .await?;
        if response.status().is_success() {
            return Ok(());
        }
        Err(GathererError::elastic(index, "put mapping", response.text().await?))
    }

    /// Drop and recreate `index` when `err` is a mapping conflict and the
    /// index may be recreated. Returns whether it was.
    async fn recreate_if_conflicting(&self, index: &str, err: &GathererError) -> GathererResult<bool> {
        if !err.is_mapping_conflict() || !is_recreatable(index) {
            return Ok(false);
        }
        warn!(index, "Recreating index after mapping conflict");
        self.delete_index(index).await?;
        self.create_index(index).await?;
        Ok(true)
    }

    /// Create `index` or bring its mapping up to date.
    async fn prepare_index(&self, index: &str) -> GathererResult<()> {
        if !self.index_exists(index).await? {
            return self.create_index(index).await;
        }
        if let Err(err) = self.put_mapping(index).await {
            warn!(index, error = %err, "Mapping update rejected");
            self.recreate_if_conflicting(index, &err).await?;
        }
        Ok(())
    }

    /// Lift `index.blocks.read_only_allow_delete` on every index.
    pub async fn clear_read_only_block(&self) -> GathererResult<()> {
        let response = self
            .request(Method::PUT, "_all/_settings")
            .json(&json!({"index.blocks.read_only_allow_delete": null}))
            .send()
            .await?;
        if response.status().is_success() {
            return Ok(());
        }
        Err(GathererError::elastic("_all", "clear read-only block", response.text().await?))
    }

    /// Send one `_bulk` request. A rejected request is an error; rejected
    /// items are returned.
    async fn send_bulk(&self, index: &str, docs: &[BulkDocument]) -> GathererResult<Vec<BulkFailure>> {
        let response = self
            .request(Method::POST, "_bulk?refresh=true")
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(bulk_body(index, docs)?)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(GathererError::elastic(index, "bulk", text));
        }
        Ok(bulk_failures(&serde_json::from_str(&text)?))
    }
}

#[async_trait]
impl MetricsStore for ElasticClient {
    async fn bulk_index(&self, index: &str, docs: Vec<BulkDocument>) -> GathererResult<usize> {
        if docs.is_empty() {
            return Ok(0);
        }
        self.prepare_index(index).await?;
        debug!(index, count = docs.len(), "Indexing documents");

        let (err, failures) = match self.send_bulk(index, &docs).await {
            Ok(failures) if failures.is_empty() => return Ok(docs.len()),
            Ok(failures) => (failures_error(index, &failures), Some(failures)),
            Err(err) => (err, None),
        };
        warn!(index, error = %err, "Bulk write failed, retrying once");
        let recreated = self.recreate_if_conflicting(index, &err).await?;
        self.clear_read_only_block().await?;

        let retry = match &failures {
            Some(failures) => retry_batch(&docs, failures, recreated),
            None => docs.clone(),
        };
        let failures = self.send_bulk(index, &retry).await?;
        if failures.is_empty() {
            Ok(docs.len())
        } else {
            Err(failures_error(index, &failures))
        }
    }

    async fn search(&self, index: &str, query: Value, size: usize) -> GathererResult<Vec<Value>> {
        if !self.index_exists(index).await? {
            return Ok(Vec::new());
        }
        let response = self
            .request(Method::POST, &format!("{}/_search", index))
            .json(&json!({"size": size, "query": query}))
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(GathererError::elastic(index, "search", text));
        }
        Ok(hit_sources(&serde_json::from_str(&text)?))
    }

    async fn delete_older_than(
        &self,
        index: &str,
        field: &str,
        cutoff: NaiveDate,
    ) -> GathererResult<u64> {
        if !self.index_exists(index).await? {
            return Ok(0);
        }
        let query = json!({
            "query": {"bool": {"filter": [
                {"range": {field: {"lte": cutoff.format("%Y-%m-%d").to_string()}}}
            ]}}
        });
        let response = self
            .request(
                Method::POST,
                &format!("{}/_delete_by_query?refresh=true&conflicts=proceed", index),
            )
            .json(&query)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(GathererError::elastic(index, "delete by query", text));
        }
        let body: Value = serde_json::from_str(&text)?;
        Ok(body["deleted"].as_u64().unwrap_or(0))
    }

    async fn is_healthy(&self) -> bool {
        let result = async {
            let response = self.request(Method::GET, "_cluster/health").send().await?;
            let body: Value = response.json().await?;
            Ok::<_, GathererError>(matches!(body["status"].as_str(), Some("green" | "yellow")))
        }
        .await;
        match result {
            Ok(healthy) => healthy,
            Err(err) => {
                error!(host = %redact_url(&self.host), error = %err, "Elasticsearch is not healthy");
                false
            }
        }
    }
}
