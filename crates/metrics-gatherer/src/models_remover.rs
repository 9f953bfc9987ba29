//! Applies retirement policies to a project's trained models.
//!
//! Per model type: ask the model service where the current model lives,
//! evaluate the policy on the trailing window of stored metrics, remove the
//! model when the policy says so, and write one audit document.

use crate::amqp::ModelService;
use crate::error::GathererResult;
use crate::es_client::{BulkDocument, MetricsStore, MODEL_REMOVE_STATS_INDEX};
use crate::store;
use chrono::NaiveDateTime;
use metrics_core::metrics::row::store_datetime;
use metrics_core::{trailing_window, ModelType, RetirementEngine};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

/// One retirement evaluation as stored in the audit index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRemovalAudit {
    pub project_id: i64,
    pub model_type: ModelType,
    pub model_folder: String,
    /// Rule text the decision was made under.
    pub metric_conditions: String,
    /// `"field:mean;field:mean"` as observed.
    pub metric_values: String,
    pub model_removed: u8,
    #[serde(with = "store_datetime")]
    pub gather_date: NaiveDateTime,
    pub module_version: Vec<String>,
}

pub struct ModelsRemover<'a> {
    engine: &'a RetirementEngine,
    store: &'a dyn MetricsStore,
    service: &'a dyn ModelService,
}

impl<'a> ModelsRemover<'a> {
    pub fn new(
        engine: &'a RetirementEngine,
        store: &'a dyn MetricsStore,
        service: &'a dyn ModelService,
    ) -> Self {
        Self {
            engine,
            store,
            service,
        }
    }

    /// Evaluate every model type for `project_id` on the week up to
    /// `gathered_at` and store the audits. A failing model type is logged and
    /// the others still run.
    pub async fn apply_policies(
        &self,
        project_id: i64,
        gathered_at: NaiveDateTime,
    ) -> Vec<ModelRemovalAudit> {
        let mut audits = Vec::new();
        for model_type in ModelType::ALL {
            match self.evaluate_model(project_id, model_type, gathered_at).await {
                Ok(Some(audit)) => audits.push(audit),
                Ok(None) => {}
                Err(err) => {
                    error!(project_id, %model_type, error = %err, "Model retirement check failed")
                }
            }
        }

        if let Err(err) = self.write_audits(&audits).await {
            error!(project_id, error = %err, "Couldn't store model removal audits");
        }
        audits
    }

    /// `None` when the project has no model of this type.
    pub async fn evaluate_model(
        &self,
        project_id: i64,
        model_type: ModelType,
        gathered_at: NaiveDateTime,
    ) -> GathererResult<Option<ModelRemovalAudit>> {
        let folder = self.service.model_folder(project_id, model_type).await?;
        if folder.trim().is_empty() {
            debug!(project_id, %model_type, "No model to check");
            return Ok(None);
        }

        let (start, end) = trailing_window(gathered_at.date());
        let documents =
            store::fetch_metric_documents(self.store, model_type, project_id, start, end).await?;
        let decision = self.engine.evaluate(model_type, &documents);

        let removed = if decision.should_delete {
            let removed = self.service.remove_models(project_id, model_type).await?;
            info!(
                project_id,
                %model_type,
                folder = %folder,
                metrics = %decision.metrics_summary(),
                removed,
                "Model met retirement conditions"
            );
            removed
        } else {
            false
        };

        Ok(Some(ModelRemovalAudit {
            project_id,
            model_type,
            model_folder: folder,
            metric_conditions: self
                .engine
                .policy(model_type)
                .map(|p| p.rules.clone())
                .unwrap_or_default(),
            metric_values: decision.metrics_summary(),
            model_removed: u8::from(removed),
            gather_date: gathered_at,
            module_version: decision.module_version.into_iter().collect(),
        }))
    }

    async fn write_audits(&self, audits: &[ModelRemovalAudit]) -> GathererResult<()> {
        if audits.is_empty() {
            return Ok(());
        }
        let docs = audits
            .iter()
            .map(|audit| Ok(BulkDocument::new(serde_json::to_value(audit)?)))
            .collect::<GathererResult<Vec<_>>>()?;
        self.store.bulk_index(MODEL_REMOVE_STATS_INDEX, docs).await?;
        Ok(())
    }
}
