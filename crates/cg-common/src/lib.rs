//! Types shared across the CDL Gateway crates

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod logging;

pub use logging::init_logging;

// ============================================================================
// Broker Node Types
// ============================================================================

/// One addressable endpoint of the broker cluster.
///
/// Nodes are supplied at startup and never change afterwards. The identity of
/// a node is its `host:port` pair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerNode {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_password")]
    pub password: String,
}

fn default_username() -> String { "guest".to_string() }
fn default_password() -> String { "guest".to_string() }

impl BrokerNode {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
        }
    }

    /// Identity key used in logs, headers and status output
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for BrokerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerNode")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Health of a single broker node as seen by this client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Never tried, or breaker cooled down
    #[default]
    Unknown,
    /// Last connection attempt succeeded
    Healthy,
    /// Reachable, but the last publish over it failed
    Degraded,
    /// Last connection attempt failed
    Failed,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Unknown => "unknown",
            NodeStatus::Healthy => "healthy",
            NodeStatus::Degraded => "degraded",
            NodeStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Cluster Status Types
// ============================================================================

/// Point-in-time view of one node, as exposed to health checks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatusReport {
    pub index: usize,
    pub host: String,
    pub port: u16,
    pub status: NodeStatus,
    /// Consecutive failed connection attempts
    pub connection_attempts: u32,
    pub is_current: bool,
}

/// Point-in-time view of the whole cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub total_nodes: usize,
    pub current_node_index: Option<usize>,
    pub connected: bool,
    pub nodes: Vec<NodeStatusReport>,
}

impl ClusterStatus {
    pub fn healthy_nodes(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.status == NodeStatus::Healthy)
            .count()
    }

    pub fn current_node(&self) -> Option<&NodeStatusReport> {
        self.nodes.iter().find(|n| n.is_current)
    }
}
