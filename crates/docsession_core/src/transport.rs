//! Wire transport collaborator.
//!
//! The session never talks to the network itself. Batches and reads go
//! through a [`Transport`] owned by the store context.

use crate::config::{ReadBalanceBehavior, TransactionMode};
use crate::counters::CounterDetail;
use crate::types::{BatchOptions, ServerNode, SessionInfo};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Failures reported by a transport.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The request did not reach the server or the response was lost.
    #[error("network error: {message}")]
    Network {
        /// Description of the failure.
        message: String,
        /// Whether the transport considers a retry safe.
        retryable: bool,
    },

    /// The server rejected the request.
    #[error("server error ({status}): {message}")]
    Server {
        /// Status code.
        status: u16,
        /// Server-provided message.
        message: String,
    },

    /// A change vector did not match the server's.
    #[error("concurrency violation on {id}: {message}")]
    Concurrency {
        /// Document or key whose version did not match.
        id: String,
        /// Server-provided message.
        message: String,
    },

    /// The response could not be understood.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the problem.
        message: String,
    },
}

impl TransportError {
    /// Creates a network error.
    pub fn network(message: impl Into<String>, retryable: bool) -> Self {
        Self::Network {
            message: message.into(),
            retryable,
        }
    }

    /// Creates a concurrency error.
    pub fn concurrency(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Concurrency {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Returns true if the transport marked the failure as retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { retryable, .. } => *retryable,
            Self::Server { status, .. } => *status == 503,
            Self::Concurrency { .. } | Self::Protocol { .. } => false,
        }
    }
}

/// A compiled save-changes batch as sent over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatchCommand {
    /// Commands in wire order.
    pub commands: Vec<Value>,
    /// Replication and index wait options.
    #[serde(skip)]
    pub options: BatchOptions,
    /// Transaction lane.
    #[serde(skip)]
    pub transaction_mode: TransactionMode,
}

/// Server response to a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatchCommandResult {
    /// One result per command, in the order the commands were sent.
    pub results: Vec<Value>,
    /// Cluster transaction index, when the batch ran cluster-wide.
    #[serde(default)]
    pub transaction_index: Option<u64>,
}

/// Read requests a session issues directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadRequest {
    /// Fetch documents by id, with include paths.
    GetDocuments {
        /// Ids to fetch.
        ids: Vec<String>,
        /// Include paths resolved against each result.
        includes: Vec<String>,
    },
    /// Fetch counters of one document; empty `counters` means all.
    GetCounters {
        /// Owning document.
        document_id: String,
        /// Counter names.
        counters: Vec<String>,
    },
}

/// Response to [`ReadRequest::GetDocuments`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetDocumentsResult {
    /// One entry per requested id; `None` when the document does not exist.
    pub results: Vec<Option<Value>>,
    /// Side-loaded documents keyed by id; `null` for missing includes.
    #[serde(default)]
    pub includes: Map<String, Value>,
}

/// Response to [`ReadRequest::GetCounters`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CountersDetail {
    /// One entry per requested counter; `None` when it does not exist.
    pub counters: Vec<Option<CounterDetail>>,
}

/// Wire transport used by sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a save-changes batch.
    async fn dispatch(
        &self,
        database: &str,
        batch: &BatchCommand,
        session: &SessionInfo,
    ) -> Result<BatchCommandResult, TransportError>;

    /// Executes a single read.
    async fn execute(
        &self,
        database: &str,
        request: &ReadRequest,
        session: &SessionInfo,
    ) -> Result<Value, TransportError>;

    /// Picks the node serving reads for a session.
    async fn select_node(
        &self,
        database: &str,
        policy: ReadBalanceBehavior,
        session_affinity: u64,
    ) -> Result<ServerNode, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn retry_hints() {
        assert!(TransportError::network("reset", true).is_retryable());
        assert!(!TransportError::network("refused", false).is_retryable());
        assert!(!TransportError::concurrency("orders/1", "mismatch").is_retryable());
        assert!(TransportError::Server {
            status: 503,
            message: "busy".into()
        }
        .is_retryable());
    }

    #[test]
    fn batch_result_parses_server_shape() {
        let result: BatchCommandResult = serde_json::from_value(json!({
            "Results": [{"Type": "PUT", "@id": "orders/1"}],
            "TransactionIndex": 42
        }))
        .unwrap();
        assert_eq!(result.results.len(), 1);
        assert_eq!(result.transaction_index, Some(42));
    }

    #[test]
    fn documents_result_tolerates_missing_includes() {
        let result: GetDocumentsResult =
            serde_json::from_value(json!({"Results": [null]})).unwrap();
        assert_eq!(result.results, vec![None]);
        assert!(result.includes.is_empty());
    }
}
