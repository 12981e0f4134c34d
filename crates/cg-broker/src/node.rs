//! Per-node health bookkeeping and the cluster state it lives in

use std::time::Instant;

use cg_common::{BrokerNode, NodeStatus};

/// Health of one configured node
#[derive(Debug, Clone, Default)]
pub struct NodeHealth {
    pub status: NodeStatus,
    pub consecutive_failures: u32,
    pub last_attempt_at: Option<Instant>,
    /// When the circuit breaker last let this node through after a cooldown
    pub last_reset_at: Option<Instant>,
}

/// Health entries for every configured node, indexed like the node list
#[derive(Debug, Clone)]
pub struct NodeRegistry {
    entries: Vec<NodeHealth>,
}

impl NodeRegistry {
    pub fn new(node_count: usize) -> Self {
        Self {
            entries: vec![NodeHealth::default(); node_count],
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&NodeHealth> {
        self.entries.get(index)
    }

    pub fn status(&self, index: usize) -> NodeStatus {
        self.entries.get(index).map(|h| h.status).unwrap_or_default()
    }

    pub fn consecutive_failures(&self, index: usize) -> u32 {
        self.entries.get(index).map(|h| h.consecutive_failures).unwrap_or(0)
    }

    pub fn record_success(&mut self, index: usize) {
        self.record_success_at(index, Instant::now());
    }

    pub fn record_success_at(&mut self, index: usize, now: Instant) {
        if let Some(health) = self.entries.get_mut(index) {
            health.status = NodeStatus::Healthy;
            health.consecutive_failures = 0;
            health.last_attempt_at = Some(now);
        }
    }

    pub fn record_failure(&mut self, index: usize) {
        self.record_failure_at(index, Instant::now());
    }

    pub fn record_failure_at(&mut self, index: usize, now: Instant) {
        if let Some(health) = self.entries.get_mut(index) {
            health.status = NodeStatus::Failed;
            health.consecutive_failures = health.consecutive_failures.saturating_add(1);
            health.last_attempt_at = Some(now);
        }
    }

    /// Reachable, but the last operation over it failed
    pub fn mark_degraded(&mut self, index: usize) {
        if let Some(health) = self.entries.get_mut(index) {
            health.status = NodeStatus::Degraded;
        }
    }

    /// Clear the failure counter after a cooldown so the node can be probed again
    pub fn reset(&mut self, index: usize, now: Instant) {
        if let Some(health) = self.entries.get_mut(index) {
            health.status = NodeStatus::Unknown;
            health.consecutive_failures = 0;
            health.last_reset_at = Some(now);
        }
    }

    /// Drop a `Failed` status back to `Unknown`, keeping the counters
    pub fn expire_failure(&mut self, index: usize) {
        if let Some(health) = self.entries.get_mut(index) {
            if health.status == NodeStatus::Failed {
                health.status = NodeStatus::Unknown;
            }
        }
    }

    /// Indices of nodes currently marked healthy, in list order
    pub fn healthy_indices(&self) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, h)| h.status == NodeStatus::Healthy)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Process-lifetime view of the cluster held by one client instance
#[derive(Debug, Clone)]
pub struct ClusterState {
    pub nodes: Vec<BrokerNode>,
    pub registry: NodeRegistry,
    pub current_node_index: Option<usize>,
    pub last_successful_node_index: Option<usize>,
    pub connected: bool,
}

impl ClusterState {
    pub fn new(nodes: Vec<BrokerNode>) -> Self {
        let registry = NodeRegistry::new(nodes.len());
        Self {
            nodes,
            registry,
            current_node_index: None,
            last_successful_node_index: None,
            connected: false,
        }
    }

    pub fn current_node(&self) -> Option<&BrokerNode> {
        self.current_node_index.and_then(|i| self.nodes.get(i))
    }

    pub fn mark_connected(&mut self, index: usize) {
        self.current_node_index = Some(index);
        self.last_successful_node_index = Some(index);
        self.connected = true;
    }

    pub fn mark_disconnected(&mut self) {
        self.current_node_index = None;
        self.connected = false;
    }
}
