//! Scripted in-memory broker cluster for unit tests

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cg_common::BrokerNode;
use parking_lot::Mutex;

use crate::error::BrokerError;
use crate::message::OutboundMessage;
use crate::queue::QueueSpec;
use crate::transport::{BrokerConnector, BrokerSession, ConnectOptions};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeBehavior {
    Accept,
    Refuse,
    /// Accepts connections but every publish fails
    FailPublish,
}

#[derive(Default)]
struct MockState {
    behaviors: Vec<NodeBehavior>,
    connect_attempts: Vec<usize>,
    existing_queues: HashSet<String>,
    declared: Vec<QueueSpec>,
    published: Vec<(usize, OutboundMessage)>,
    publish_attempts: usize,
    sessions: Vec<Arc<AtomicBool>>,
}

#[derive(Clone)]
pub struct MockBroker {
    state: Arc<Mutex<MockState>>,
}

impl MockBroker {
    pub fn new(behaviors: Vec<NodeBehavior>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                behaviors,
                ..Default::default()
            })),
        }
    }

    /// Nodes named `rabbit-<index>`, matching the behaviour list
    pub fn nodes(&self) -> Vec<BrokerNode> {
        let count = self.state.lock().behaviors.len();
        (0..count)
            .map(|i| BrokerNode::new(format!("rabbit-{}", i), 5672, "guest", "guest"))
            .collect()
    }

    pub fn set_behavior(&self, index: usize, behavior: NodeBehavior) {
        self.state.lock().behaviors[index] = behavior;
    }

    /// Simulate every open connection being dropped by the broker side
    pub fn drop_connections(&self) {
        for open in self.state.lock().sessions.iter() {
            open.store(false, Ordering::SeqCst);
        }
    }

    pub fn add_existing_queue(&self, name: &str) {
        self.state.lock().existing_queues.insert(name.to_string());
    }

    pub fn connect_attempts(&self) -> Vec<usize> {
        self.state.lock().connect_attempts.clone()
    }

    pub fn declared(&self) -> Vec<QueueSpec> {
        self.state.lock().declared.clone()
    }

    pub fn published(&self) -> Vec<(usize, OutboundMessage)> {
        self.state.lock().published.clone()
    }

    pub fn publish_attempts(&self) -> usize {
        self.state.lock().publish_attempts
    }

    fn node_index(node: &BrokerNode) -> usize {
        node.host
            .strip_prefix("rabbit-")
            .and_then(|i| i.parse().ok())
            .unwrap_or(usize::MAX)
    }
}

#[async_trait]
impl BrokerConnector for MockBroker {
    async fn connect(&self, node: &BrokerNode, _options: &ConnectOptions) -> Result<Box<dyn BrokerSession>> {
        let index = Self::node_index(node);
        let mut state = self.state.lock();
        state.connect_attempts.push(index);

        match state.behaviors.get(index) {
            Some(NodeBehavior::Accept) | Some(NodeBehavior::FailPublish) => {
                let open = Arc::new(AtomicBool::new(true));
                state.sessions.push(open.clone());
                Ok(Box::new(MockSession {
                    index,
                    open,
                    state: self.state.clone(),
                }))
            }
            _ => Err(BrokerError::connection(node.key(), "connection refused")),
        }
    }
}

struct MockSession {
    index: usize,
    open: Arc<AtomicBool>,
    state: Arc<Mutex<MockState>>,
}

impl MockSession {
    fn check_open(&self) -> Result<()> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::channel("channel closed"))
        }
    }
}

#[async_trait]
impl BrokerSession for MockSession {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn probe(&mut self, _budget: Duration) -> Result<()> {
        self.check_open()
    }

    async fn queue_exists(&mut self, name: &str) -> Result<bool> {
        self.check_open()?;
        Ok(self.state.lock().existing_queues.contains(name))
    }

    async fn declare_queue(&mut self, spec: &QueueSpec) -> Result<()> {
        self.check_open()?;
        let mut state = self.state.lock();
        state.existing_queues.insert(spec.name.clone());
        state.declared.push(spec.clone());
        Ok(())
    }

    async fn publish(&mut self, message: &OutboundMessage) -> Result<()> {
        let mut state = self.state.lock();
        state.publish_attempts += 1;
        self.check_open()?;
        if state.behaviors.get(self.index) == Some(&NodeBehavior::FailPublish) {
            return Err(BrokerError::channel("publish failed"));
        }
        state.published.push((self.index, message.clone()));
        Ok(())
    }

    async fn close(&mut self) {
        self.open.store(false, Ordering::SeqCst);
    }
}
