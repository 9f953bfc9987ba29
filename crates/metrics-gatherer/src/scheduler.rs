//! Gathering cycles on a fixed cadence.
//!
//! ```text
//! tick ──► in allowed window? ──no──► skip
//!              │yes
//!              ▼
//!          date_to_check(now) already done? ──yes──► skip
//!              │no
//!              ▼
//!          sweep(date) ──► retention ──► done marker
//! ```
//!
//! One loop drives all ticks, and a run-in-progress flag keeps a manual
//! trigger from overlapping a scheduled one.

use crate::amqp::{AmqpModelService, ModelService};
use crate::config::GathererConfig;
use crate::error::{GathererError, GathererResult};
use crate::es_client::{ElasticClient, MetricsStore};
use crate::gatherer::{MetricsGatherer, SweepSummary};
use crate::models_remover::ModelsRemover;
use crate::postgres_dao::{PostgresDao, ProjectSource};
use crate::store;
use chrono::{Local, NaiveDate, NaiveDateTime};
use metrics_core::{date_to_check, RetirementEngine};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What a tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    OutsideWindow,
    AlreadyGathered(NaiveDate),
    Gathered { date: NaiveDate, summary: SweepSummary },
}

/// Held for the duration of a cycle; releases the flag on drop.
#[derive(Debug)]
pub struct CycleGuard {
    flag: Arc<AtomicBool>,
}

impl CycleGuard {
    /// `None` while another cycle holds the flag.
    pub fn try_begin(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                flag: Arc::clone(flag),
            })
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Backends one cycle works against.
pub struct CycleBackends<'a> {
    pub projects: &'a dyn ProjectSource,
    pub store: &'a dyn MetricsStore,
    /// Absent when the model service is not configured or unreachable.
    pub models: Option<&'a dyn ModelService>,
}

/// Sweep `[from, to]` against `backends`, with model retirement when a model
/// service is available.
pub async fn sweep(
    backends: &CycleBackends<'_>,
    engine: &RetirementEngine,
    from: NaiveDate,
    to: NaiveDate,
    now: NaiveDateTime,
) -> GathererResult<SweepSummary> {
    let gatherer = MetricsGatherer::new(backends.projects, backends.store);
    match backends.models {
        Some(models) => {
            let remover = ModelsRemover::new(engine, backends.store, models);
            gatherer.with_remover(&remover).gather_metrics(from, to, now).await
        }
        None => gatherer.gather_metrics(from, to, now).await,
    }
}

/// One scheduled cycle at `now`.
pub async fn run_cycle(
    config: &GathererConfig,
    backends: &CycleBackends<'_>,
    engine: &RetirementEngine,
    now: NaiveDateTime,
) -> GathererResult<CycleOutcome> {
    if !config.schedule.allowed_window.contains(now.time()) {
        debug!(window = %config.schedule.allowed_window, "Outside allowed window, skipping");
        return Ok(CycleOutcome::OutsideWindow);
    }

    let date = date_to_check(now);
    if store::is_date_gathered(backends.store, date).await? {
        debug!(%date, "Metrics already gathered");
        return Ok(CycleOutcome::AlreadyGathered(date));
    }

    let summary = sweep(backends, engine, date, date, now).await?;
    let deleted =
        store::delete_old_info(backends.store, now.date(), config.schedule.max_days_store).await;
    debug!(deleted, "Retention pass finished");
    store::mark_date_gathered(backends.store, date, now).await?;
    Ok(CycleOutcome::Gathered { date, summary })
}

/// Drives cycles against the live backends.
pub struct Scheduler {
    config: Arc<GathererConfig>,
    engine: RetirementEngine,
    running: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(config: Arc<GathererConfig>) -> Self {
        let engine =
            RetirementEngine::new(&config.policies.auto_analysis, &config.policies.suggest);
        for policy in engine.policies() {
            if policy.conditions.is_empty() {
                warn!(model_type = %policy.model_type, rules = %policy.rules, "No usable retirement conditions");
            }
        }
        Self {
            config,
            engine,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Tick immediately, then on every interval.
    pub async fn run_forever(&self) {
        info!(
            interval = %self.config.schedule.interval,
            window = %self.config.schedule.allowed_window,
            "Scheduler started"
        );
        loop {
            self.tick().await;
            let now = Local::now().naive_local();
            let wait = self
                .config
                .schedule
                .interval
                .until_next_tick(now, self.config.schedule.allowed_window.start)
                .to_std()
                .unwrap_or(Duration::from_secs(60));
            tokio::time::sleep(wait).await;
        }
    }

    /// Run one cycle unless one is already in progress.
    pub async fn tick(&self) -> Option<CycleOutcome> {
        let Some(_guard) = CycleGuard::try_begin(&self.running) else {
            debug!("Cycle already in progress, skipping tick");
            return None;
        };
        let now = Local::now().naive_local();
        if !self.config.schedule.allowed_window.contains(now.time()) {
            debug!(window = %self.config.schedule.allowed_window, "Outside allowed window, skipping");
            return Some(CycleOutcome::OutsideWindow);
        }

        let outcome = match LiveBackends::connect(&self.config).await {
            Ok(live) => {
                let outcome = run_cycle(&self.config, &live.borrow(), &self.engine, now).await;
                live.close().await;
                outcome
            }
            Err(err) => Err(err),
        };
        match outcome {
            Ok(outcome) => {
                info!(?outcome, "Cycle finished");
                Some(outcome)
            }
            Err(err) => {
                error!(error = %err, "Cycle failed");
                None
            }
        }
    }

    /// Sweep an explicit range, bypassing the window and the done marker.
    pub async fn run_range(&self, from: NaiveDate, to: NaiveDate) -> GathererResult<SweepSummary> {
        let Some(_guard) = CycleGuard::try_begin(&self.running) else {
            return Err(GathererError::Config(
                "a gathering cycle is already running".to_string(),
            ));
        };
        let now = Local::now().naive_local();
        let live = LiveBackends::connect(&self.config).await?;
        let summary = sweep(&live.borrow(), &self.engine, from, to, now).await;
        live.close().await;
        summary
    }
}

/// Connections opened for a single cycle.
struct LiveBackends {
    store: ElasticClient,
    projects: PostgresDao,
    models: Option<AmqpModelService>,
}

impl LiveBackends {
    async fn connect(config: &GathererConfig) -> GathererResult<Self> {
        let store = ElasticClient::new(&config.elastic)?;
        let projects = PostgresDao::connect(&config.postgres).await?;
        let models = if config.retirement_enabled() {
            match AmqpModelService::connect(&config.amqp).await {
                Ok(service) => Some(service),
                Err(err) => {
                    warn!(error = %err, "Model service unavailable, retirement skipped this cycle");
                    None
                }
            }
        } else {
            None
        };
        Ok(Self {
            store,
            projects,
            models,
        })
    }

    fn borrow(&self) -> CycleBackends<'_> {
        CycleBackends {
            projects: &self.projects,
            store: &self.store,
            models: self.models.as_ref().map(|m| m as &dyn ModelService),
        }
    }

    async fn close(self) {
        if let Some(models) = self.models {
            if let Err(err) = models.close().await {
                debug!(error = %err, "Closing model service connection failed");
            }
        }
    }
}
