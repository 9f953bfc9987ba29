//! HTTP health endpoint

use crate::amqp::broker_reachable;
use crate::config::GathererConfig;
use crate::es_client::{ElasticClient, MetricsStore};
use crate::postgres_dao::PostgresDao;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

/// Reachability of each backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendHealth {
    pub elasticsearch: bool,
    pub postgres: bool,
    pub amqp: bool,
}

impl BackendHealth {
    /// `"X is not healthy;"` per failing backend, in a fixed order.
    pub fn problems(&self) -> String {
        [
            (self.elasticsearch, "Elasticsearch"),
            (self.postgres, "Postgres"),
            (self.amqp, "AMQP connection"),
        ]
        .iter()
        .filter(|(healthy, _)| !healthy)
        .map(|(_, name)| format!("{} is not healthy;", name))
        .collect()
    }
}

/// Body of the health response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Status code and body for a health snapshot.
pub fn health_response(health: BackendHealth) -> (StatusCode, Json<HealthResponse>) {
    let problems = health.problems();
    if problems.is_empty() {
        (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy".to_string(),
            }),
        )
    } else {
        warn!(problems = %problems, "Health check failed");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse { status: problems }),
        )
    }
}

async fn postgres_reachable(config: &GathererConfig) -> bool {
    let result = async { PostgresDao::connect(&config.postgres).await?.ping().await }.await;
    if let Err(err) = &result {
        warn!(host = %config.postgres.host, error = %err, "Postgres is not healthy");
    }
    result.is_ok()
}

async fn elasticsearch_reachable(config: &GathererConfig) -> bool {
    match ElasticClient::new(&config.elastic) {
        Ok(client) => client.is_healthy().await,
        Err(err) => {
            warn!(error = %err, "Elasticsearch client could not be built");
            false
        }
    }
}

/// Probe every backend concurrently.
pub async fn check_backends(config: &GathererConfig) -> BackendHealth {
    let (elasticsearch, postgres, amqp) = tokio::join!(
        elasticsearch_reachable(config),
        postgres_reachable(config),
        broker_reachable(&config.amqp),
    );
    BackendHealth {
        elasticsearch,
        postgres,
        amqp,
    }
}

async fn health_handler(
    State(config): State<Arc<GathererConfig>>,
) -> (StatusCode, Json<HealthResponse>) {
    health_response(check_backends(&config).await)
}

pub fn router(config: Arc<GathererConfig>) -> Router {
    Router::new()
        .route("/", get(health_handler))
        .with_state(config)
}

/// Serve the health endpoint until the listener fails.
pub async fn serve(config: Arc<GathererConfig>) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Health endpoint listening");
    axum::serve(listener, router(config)).await
}
