//! Service error types
//!
//! Every backend failure maps onto one variant here. The gathering sweep
//! catches these per project and per model type; nothing is surfaced beyond
//! logs and the health endpoint.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for service operations
pub type GathererResult<T> = Result<T, GathererError>;

/// Errors raised by the service's backend adapters
#[derive(Error, Debug)]
pub enum GathererError {
    /// Relational store query or connection failed
    #[error("Postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Transport-level failure talking to Elasticsearch
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Elasticsearch answered but rejected the operation
    #[error("Elasticsearch rejected {operation} on '{index}': {message}")]
    Elastic {
        index: String,
        operation: String,
        message: String,
    },

    /// Message broker failure
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    /// The model service did not answer in time
    #[error("No reply to '{method}' within {timeout:?}")]
    RpcTimeout { method: String, timeout: Duration },

    /// The reply consumer stopped before an answer arrived
    #[error("Reply channel closed while waiting for '{method}'")]
    RpcClosed { method: String },

    /// Payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration value unusable at runtime
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl GathererError {
    pub fn elastic(index: &str, operation: &str, message: impl Into<String>) -> Self {
        Self::Elastic {
            index: index.to_string(),
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    /// Whether the error text reports a mapping conflict that recreating the
    /// index would fix.
    pub fn is_mapping_conflict(&self) -> bool {
        let text = self.to_string();
        text.contains("mapper_parsing_exception") || text.contains("illegal_argument_exception")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_conflict_detection() {
        let err = GathererError::elastic(
            "rp_aa_stats",
            "bulk",
            "type=mapper_parsing_exception reason=failed to parse field [launch_id]",
        );
        assert!(err.is_mapping_conflict());

        let err = GathererError::elastic("rp_stats", "bulk", "cluster_block_exception");
        assert!(!err.is_mapping_conflict());
    }

    #[test]
    fn test_timeout_message_names_method() {
        let err = GathererError::RpcTimeout {
            method: "get_model_info".to_string(),
            timeout: Duration::from_secs(120),
        };
        assert_eq!(err.to_string(), "No reply to 'get_model_info' within 120s");
    }
}
