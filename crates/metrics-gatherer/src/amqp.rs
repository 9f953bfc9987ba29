//! Request/reply client for the model-training service.
//!
//! ```text
//! call(method) ──publish(reply_to, correlation_id)──► exchange ──► model service
//!      ▲                                                             │
//!      └── oneshot ◄── reply consumer (routes by correlation_id) ◄───┘
//! ```
//!
//! One exclusive reply queue per connection. Each call registers a oneshot
//! sender under a fresh correlation id and waits on it with a timeout; the
//! consumer task completes whichever call a delivery belongs to.

use crate::config::AmqpConfig;
use crate::error::{GathererError, GathererResult};
use crate::es_client::redact_url;
use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use metrics_core::ModelType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Routing key answering with the folder of the project's current model.
pub const GET_MODEL_INFO: &str = "get_model_info";
/// Routing key asking the service to delete the project's models.
pub const REMOVE_MODELS: &str = "remove_models";

const CONSUMER_TAG: &str = "metrics-gatherer";

/// Request body shared by both calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRequest {
    pub project: i64,
    pub model_type: String,
}

impl ModelRequest {
    pub fn new(project: i64, model_type: ModelType) -> Self {
        Self {
            project,
            model_type: model_type.as_str().to_string(),
        }
    }
}

/// Folder named in a `get_model_info` reply; empty when the reply has none.
pub fn model_folder_from_reply(reply: &Value) -> String {
    reply["model_folder"].as_str().unwrap_or_default().trim().to_string()
}

/// Outcome of a `remove_models` reply: a boolean, or anything truthy.
pub fn removal_from_reply(reply: &Value) -> bool {
    match reply {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Calls the retirement flow makes on the model service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModelService: Send + Sync {
    /// Folder of the model currently serving `model_type`; empty if none.
    async fn model_folder(&self, project_id: i64, model_type: ModelType) -> GathererResult<String>;

    /// Ask the service to delete the project's `model_type` models.
    async fn remove_models(&self, project_id: i64, model_type: ModelType) -> GathererResult<bool>;
}

type PendingReplies = Arc<Mutex<HashMap<String, oneshot::Sender<Vec<u8>>>>>;

/// Complete the call waiting on `correlation_id`. Unknown ids are stale
/// replies to calls that already timed out.
fn deliver(pending: &PendingReplies, correlation_id: &str, body: Vec<u8>) -> bool {
    let sender = match pending.lock() {
        Ok(mut map) => map.remove(correlation_id),
        Err(poisoned) => poisoned.into_inner().remove(correlation_id),
    };
    match sender {
        Some(tx) => tx.send(body).is_ok(),
        None => {
            debug!(correlation_id, "Dropping reply with no waiting call");
            false
        }
    }
}

fn forget(pending: &PendingReplies, correlation_id: &str) {
    match pending.lock() {
        Ok(mut map) => map.remove(correlation_id),
        Err(poisoned) => poisoned.into_inner().remove(correlation_id),
    };
}

/// AMQP implementation of [`ModelService`].
pub struct AmqpModelService {
    connection: Connection,
    channel: Channel,
    exchange: String,
    reply_queue: String,
    reply_timeout: Duration,
    pending: PendingReplies,
}

impl AmqpModelService {
    /// Connect, declare the reply queue and start the reply consumer.
    pub async fn connect(config: &AmqpConfig) -> GathererResult<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| GathererError::Config("AMQP_URL is not set".to_string()))?;
        let connection = Connection::connect(url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        let queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        let reply_queue = queue.name().as_str().to_string();

        let mut consumer = channel
            .basic_consume(
                &reply_queue,
                CONSUMER_TAG,
                BasicConsumeOptions {
                    no_ack: true,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));
        let routes = Arc::clone(&pending);
        tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                match delivery {
                    Ok(delivery) => {
                        if let Some(id) = delivery.properties.correlation_id() {
                            deliver(&routes, id.as_str(), delivery.data);
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "Reply consumer stopped");
                        break;
                    }
                }
            }
        });

        info!(url = %redact_url(url), reply_queue = %reply_queue, "Connected to model service broker");
        Ok(Self {
            connection,
            channel,
            exchange: config.exchange.clone(),
            reply_queue,
            reply_timeout: config.reply_timeout,
            pending,
        })
    }

    /// Publish `request` under `method` and wait for its reply.
    async fn call(&self, method: &str, request: &ModelRequest) -> GathererResult<Value> {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        match self.pending.lock() {
            Ok(mut map) => map.insert(correlation_id.clone(), tx),
            Err(poisoned) => poisoned.into_inner().insert(correlation_id.clone(), tx),
        };

        let payload = serde_json::to_vec(request)?;
        let properties = BasicProperties::default()
            .with_reply_to(self.reply_queue.clone().into())
            .with_correlation_id(correlation_id.clone().into())
            .with_content_type("application/json".into());
        let published = async {
            self.channel
                .basic_publish(
                    &self.exchange,
                    method,
                    BasicPublishOptions::default(),
                    &payload,
                    properties,
                )
                .await?
                .await?;
            Ok::<_, GathererError>(())
        }
        .await;
        if let Err(err) = published {
            forget(&self.pending, &correlation_id);
            return Err(err);
        }
        debug!(method, project_id = request.project, model_type = %request.model_type, "Sent model service request");

        match tokio::time::timeout(self.reply_timeout, rx).await {
            Ok(Ok(body)) => Ok(serde_json::from_slice(&body)?),
            Ok(Err(_)) => Err(GathererError::RpcClosed {
                method: method.to_string(),
            }),
            Err(_) => {
                forget(&self.pending, &correlation_id);
                Err(GathererError::RpcTimeout {
                    method: method.to_string(),
                    timeout: self.reply_timeout,
                })
            }
        }
    }

    pub async fn close(self) -> GathererResult<()> {
        self.connection.close(200, "OK").await?;
        Ok(())
    }
}

#[async_trait]
impl ModelService for AmqpModelService {
    async fn model_folder(&self, project_id: i64, model_type: ModelType) -> GathererResult<String> {
        let reply = self
            .call(GET_MODEL_INFO, &ModelRequest::new(project_id, model_type))
            .await?;
        Ok(model_folder_from_reply(&reply))
    }

    async fn remove_models(&self, project_id: i64, model_type: ModelType) -> GathererResult<bool> {
        let reply = self
            .call(REMOVE_MODELS, &ModelRequest::new(project_id, model_type))
            .await?;
        Ok(removal_from_reply(&reply))
    }
}

/// Whether the broker accepts a connection.
pub async fn broker_reachable(config: &AmqpConfig) -> bool {
    let Some(url) = config.url.as_deref() else {
        return true;
    };
    match Connection::connect(url, ConnectionProperties::default()).await {
        Ok(connection) => {
            if let Err(err) = connection.close(200, "OK").await {
                debug!(error = %err, "Closing health-check connection failed");
            }
            true
        }
        Err(err) => {
            warn!(url = %redact_url(url), error = %err, "AMQP is not healthy");
            false
        }
    }
}
