//! Read-only cluster health snapshots

use std::sync::Arc;

use cg_common::{ClusterStatus, NodeStatusReport};
use parking_lot::RwLock;

use crate::connection::ConnectionManager;
use crate::node::ClusterState;

/// Cheap handle onto a client's cluster state.
///
/// Snapshots take a read lock only, so they never wait for an in-flight send.
#[derive(Clone)]
pub struct StatusReporter {
    state: Arc<RwLock<ClusterState>>,
}

impl StatusReporter {
    pub fn new(state: Arc<RwLock<ClusterState>>) -> Self {
        Self { state }
    }

    pub fn snapshot(&self) -> ClusterStatus {
        let state = self.state.read();
        let nodes = state
            .nodes
            .iter()
            .enumerate()
            .map(|(index, node)| NodeStatusReport {
                index,
                host: node.host.clone(),
                port: node.port,
                status: state.registry.status(index),
                connection_attempts: state.registry.consecutive_failures(index),
                is_current: state.current_node_index == Some(index),
            })
            .collect();

        ClusterStatus {
            total_nodes: state.nodes.len(),
            current_node_index: state.current_node_index,
            connected: state.connected,
            nodes,
        }
    }
}

impl From<&ConnectionManager> for StatusReporter {
    fn from(manager: &ConnectionManager) -> Self {
        Self::new(manager.shared_state())
    }
}
