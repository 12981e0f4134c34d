//! ConnectionManager - owns the single active broker session
//!
//! Node selection for every connect pass, in order:
//! 1. the last node we successfully connected to
//! 2. nodes currently marked healthy, in list order
//! 3. every node, in list order, with nodes degraded by a failed publish last
//!
//! Each node is attempted at most once per pass and never more than once per
//! attempt (the outer retry loop belongs to the publisher). Nodes whose
//! circuit breaker is open are skipped, unless every node is open, in which
//! case all of them are tried anyway.

use std::sync::Arc;
use std::time::Duration;

use cg_common::{BrokerNode, NodeStatus};
use cg_config::BrokerConfig;
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::breaker::CircuitBreaker;
use crate::error::BrokerError;
use crate::node::ClusterState;
use crate::transport::{BrokerConnector, BrokerSession, ConnectOptions};
use crate::Result;

pub struct ConnectionManager {
    /// Shared with `StatusReporter`; written only here, never across an await
    state: Arc<RwLock<ClusterState>>,
    breaker: CircuitBreaker,
    connector: Arc<dyn BrokerConnector>,
    options: ConnectOptions,
    probe_timeout: Duration,
    session: Option<Box<dyn BrokerSession>>,
}

impl ConnectionManager {
    pub fn new(
        nodes: Vec<BrokerNode>,
        connector: Arc<dyn BrokerConnector>,
        options: ConnectOptions,
        breaker: CircuitBreaker,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            state: Arc::new(RwLock::new(ClusterState::new(nodes))),
            breaker,
            connector,
            options,
            probe_timeout,
            session: None,
        }
    }

    pub fn from_config(config: &BrokerConfig, connector: Arc<dyn BrokerConnector>) -> Self {
        let options = ConnectOptions {
            connection_timeout: config.connection_timeout(),
            heartbeat_secs: config.heartbeat_secs,
            publisher_confirms: config.publisher_confirms,
            connection_name: config.sender_id.clone(),
        };
        let breaker = CircuitBreaker::new(config.retry_attempts, config.breaker_cooldown());
        Self::new(config.nodes.clone(), connector, options, breaker, config.probe_timeout())
    }

    pub fn shared_state(&self) -> Arc<RwLock<ClusterState>> {
        self.state.clone()
    }

    pub fn node_count(&self) -> usize {
        self.state.read().nodes.len()
    }

    pub fn current_node_index(&self) -> Option<usize> {
        self.state.read().current_node_index
    }

    pub fn last_successful_node_index(&self) -> Option<usize> {
        self.state.read().last_successful_node_index
    }

    pub fn current_node(&self) -> Option<BrokerNode> {
        self.state.read().current_node().cloned()
    }

    pub fn node_status(&self, index: usize) -> NodeStatus {
        self.state.read().registry.status(index)
    }

    pub fn consecutive_failures(&self, index: usize) -> u32 {
        self.state.read().registry.consecutive_failures(index)
    }

    pub fn is_connected(&self) -> bool {
        self.session.as_ref().map(|s| s.is_open()).unwrap_or(false)
    }

    /// Bring the shared `connected` flag in line with the session's own state
    pub fn refresh_connected(&self) {
        let live = self.is_connected();
        let mut state = self.state.write();
        if state.connected && !live {
            debug!("Session closed by the broker");
            state.mark_disconnected();
        }
    }

    /// The open session, if any
    pub fn session_mut(&mut self) -> Result<&mut (dyn BrokerSession + 'static)> {
        self.session.as_deref_mut().ok_or(BrokerError::NotConnected)
    }

    fn candidate_order(&self) -> Vec<usize> {
        let state = self.state.read();
        let degraded = |index: usize| state.registry.status(index) == NodeStatus::Degraded;
        let mut order = Vec::with_capacity(state.nodes.len());

        if let Some(last) = state.last_successful_node_index {
            if !degraded(last) {
                order.push(last);
            }
        }
        for index in state.registry.healthy_indices() {
            if !order.contains(&index) {
                order.push(index);
            }
        }
        for index in 0..state.nodes.len() {
            if !order.contains(&index) && !degraded(index) {
                order.push(index);
            }
        }
        // Nodes that just failed a publish come last
        for index in 0..state.nodes.len() {
            if !order.contains(&index) {
                order.push(index);
            }
        }
        order
    }

    /// Connect to the first reachable node. Returns the index of the node.
    pub async fn connect(&mut self) -> Result<usize> {
        if self.session.is_some() {
            self.close().await;
        }

        let previous = self.last_successful_node_index();
        let mut attempted = 0;
        let mut skipped = Vec::new();

        for index in self.candidate_order() {
            let open = {
                let mut state = self.state.write();
                self.breaker.is_open(&mut state.registry, index)
            };
            if open {
                debug!(node_index = index, "Skipping node with open circuit breaker");
                skipped.push(index);
                continue;
            }

            attempted += 1;
            if self.try_node(index).await {
                record_failover(previous, index);
                return Ok(index);
            }
        }

        // Stale health data must not strand the client
        if attempted == 0 && !skipped.is_empty() {
            warn!(
                nodes = skipped.len(),
                "All circuit breakers open, trying every node anyway"
            );
            for index in skipped {
                attempted += 1;
                if self.try_node(index).await {
                    record_failover(previous, index);
                    return Ok(index);
                }
            }
        }

        error!(attempted, "Failed to connect to any broker cluster node");
        Err(BrokerError::NoReachableNode { attempted })
    }

    async fn try_node(&mut self, index: usize) -> bool {
        let node = self.state.read().nodes.get(index).cloned();
        let Some(node) = node else {
            return false;
        };
        let key = node.key();
        info!(node = %key, "Attempting to connect to broker node");

        let timeout = self.options.connection_timeout;
        let result = match tokio::time::timeout(timeout, self.connector.connect(&node, &self.options)).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Timeout(timeout)),
        };

        match result {
            Ok(session) => {
                {
                    let mut state = self.state.write();
                    state.registry.record_success(index);
                    state.mark_connected(index);
                }
                self.session = Some(session);
                info!(node = %key, "Connected to broker node");
                true
            }
            Err(e) => {
                let failures = {
                    let mut state = self.state.write();
                    state.registry.record_failure(index);
                    state.registry.consecutive_failures(index)
                };
                warn!(
                    node = %key,
                    attempt = failures,
                    error = %e,
                    "Failed to connect to broker node"
                );
                false
            }
        }
    }

    /// Make sure a live session exists, reconnecting if the current one died.
    ///
    /// The probe runs before every use instead of a background heartbeat task.
    pub async fn ensure_connection(&mut self) -> Result<()> {
        let alive = match self.session.as_mut() {
            Some(session) if session.is_open() => {
                match tokio::time::timeout(self.probe_timeout, session.probe(self.probe_timeout)).await {
                    Ok(Ok(())) => Some(true),
                    Ok(Err(e)) => {
                        debug!(error = %e, "Liveness probe failed");
                        Some(false)
                    }
                    Err(_) => {
                        debug!("Liveness probe timed out");
                        Some(false)
                    }
                }
            }
            Some(_) => Some(false),
            None => None,
        };

        match alive {
            Some(true) => return Ok(()),
            Some(false) => {
                info!("Connection lost, attempting to reconnect");
                self.close().await;
            }
            None => {}
        }

        self.connect().await.map(|_| ())
    }

    /// Demote the current node after a failed operation and drop the session,
    /// so the next connect prefers a different node.
    pub async fn fail_over(&mut self) {
        if let Some(index) = self.current_node_index() {
            self.state.write().registry.mark_degraded(index);
        }
        self.close().await;
    }

    /// Close channel and connection. Safe to call when not connected.
    pub async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
        self.state.write().mark_disconnected();
    }
}

fn record_failover(previous: Option<usize>, index: usize) {
    if matches!(previous, Some(prev) if prev != index) {
        metrics::counter!("gateway_failovers_total").increment(1);
        info!(from = ?previous, to = index, "Failed over to another broker node");
    }
}
