//! Metrics gatherer service
//!
//! Scheduled sweeps that turn the reporting database's activity log and the
//! analyzer's run records into daily auto-analysis metrics, store them in
//! Elasticsearch, and retire trained models whose metrics fall below the
//! configured policies.
//!
//! # Components
//!
//! ```text
//! Scheduler ──► MetricsGatherer ──► ProjectSource (Postgres)
//!                     │         └──► MetricsStore (Elasticsearch)
//!                     ▼
//!               ModelsRemover ──► ModelService (AMQP request/reply)
//!
//! health::serve ──► GET / (Elasticsearch, Postgres, AMQP)
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod amqp;
pub mod config;
pub mod error;
pub mod es_client;
pub mod gatherer;
pub mod health;
pub mod models_remover;
pub mod postgres_dao;
pub mod scheduler;
pub mod store;

// Re-export key service types
pub use config::GathererConfig;
pub use error::{GathererError, GathererResult};
pub use gatherer::{MetricsGatherer, SweepSummary};
pub use models_remover::{ModelRemovalAudit, ModelsRemover};
pub use scheduler::{run_cycle, sweep, CycleBackends, CycleOutcome, Scheduler};

// Re-export backend seams
pub use amqp::{AmqpModelService, ModelService};
pub use es_client::{BulkDocument, ElasticClient, MetricsStore};
pub use postgres_dao::{PostgresDao, ProjectInfo, ProjectSource};
