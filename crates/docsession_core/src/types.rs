//! Core type definitions shared across the session.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How the session decides whether to send a change vector with a put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConcurrencyCheckMode {
    /// Follow the session-wide optimistic concurrency setting.
    #[default]
    Auto,
    /// Always send the stored change vector.
    Forced,
    /// Never send a change vector.
    Disabled,
}

/// A cluster node a request can be routed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerNode {
    /// Base URL of the node.
    pub url: String,
    /// Database served by the node.
    pub database: String,
    /// Cluster tag (for example `"A"`).
    pub cluster_tag: String,
}

impl ServerNode {
    /// Creates a new server node.
    pub fn new(
        url: impl Into<String>,
        database: impl Into<String>,
        cluster_tag: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            database: database.into(),
            cluster_tag: cluster_tag.into(),
        }
    }
}

impl fmt::Display for ServerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.cluster_tag, self.url)
    }
}

/// Per-session information sent along with requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Process-unique session number, used as node affinity key.
    pub session_id: u64,
    /// Last cluster transaction index observed for the database.
    pub last_cluster_transaction_index: Option<u64>,
    /// Whether responses may be served from the HTTP cache.
    pub no_caching: bool,
}

/// Replication wait options for a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReplicationBatchOptions {
    /// Number of replicas to wait for.
    pub replicas: u32,
    /// Wait for a majority instead of a fixed count.
    pub majority: bool,
    /// Fail the batch if the wait times out.
    pub throw_on_timeout: bool,
    /// How long to wait.
    #[serde(with = "millis")]
    pub timeout: Duration,
}

impl Default for ReplicationBatchOptions {
    fn default() -> Self {
        Self {
            replicas: 1,
            majority: false,
            throw_on_timeout: true,
            timeout: Duration::from_secs(15),
        }
    }
}

/// Index wait options for a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IndexBatchOptions {
    /// Indexes to wait for (empty = every index touched).
    pub indexes: Vec<String>,
    /// Fail the batch if the wait times out.
    pub throw_on_timeout: bool,
    /// How long to wait.
    #[serde(with = "millis")]
    pub timeout: Duration,
}

impl Default for IndexBatchOptions {
    fn default() -> Self {
        Self {
            indexes: Vec::new(),
            throw_on_timeout: true,
            timeout: Duration::from_secs(15),
        }
    }
}

/// Options attached to a save-changes batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatchOptions {
    /// Replication wait, if requested.
    pub replication_options: Option<ReplicationBatchOptions>,
    /// Index wait, if requested.
    pub index_options: Option<IndexBatchOptions>,
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replication_defaults() {
        let options = ReplicationBatchOptions::default();
        assert_eq!(options.replicas, 1);
        assert!(options.throw_on_timeout);
        assert!(!options.majority);
        assert_eq!(options.timeout, Duration::from_secs(15));
    }

    #[test]
    fn batch_options_serialize_timeouts_as_millis() {
        let options = BatchOptions {
            replication_options: None,
            index_options: Some(IndexBatchOptions::default()),
        };
        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(json["IndexOptions"]["Timeout"], 15_000);
        assert!(json["ReplicationOptions"].is_null());
    }

    #[test]
    fn server_node_display() {
        let node = ServerNode::new("http://127.0.0.1:8080", "shop", "A");
        assert_eq!(node.to_string(), "A@http://127.0.0.1:8080");
    }
}
