//! Transport seam between the failover state machine and the AMQP library
//!
//! `ConnectionManager` only talks to these traits. The production
//! implementation lives in `amqp` (lapin); tests script node behaviour with
//! in-memory sessions.

use std::time::Duration;

use async_trait::async_trait;
use cg_common::BrokerNode;

use crate::message::OutboundMessage;
use crate::queue::QueueSpec;
use crate::Result;

/// Options applied to every connection attempt
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Upper bound for establishing connection and channel
    pub connection_timeout: Duration,
    pub heartbeat_secs: u16,
    /// Wait for broker acks on every publish
    pub publisher_confirms: bool,
    /// Shown in the broker management UI
    pub connection_name: String,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            heartbeat_secs: 60,
            publisher_confirms: true,
            connection_name: "cdl-gateway".to_string(),
        }
    }
}

/// Opens sessions (connection + channel) to a single node
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Make exactly one attempt to connect to `node`
    async fn connect(&self, node: &BrokerNode, options: &ConnectOptions) -> Result<Box<dyn BrokerSession>>;
}

/// One open connection with one channel
#[async_trait]
pub trait BrokerSession: Send {
    /// Whether both connection and channel still report open
    fn is_open(&self) -> bool;

    /// Non-blocking liveness check bounded by `budget`
    async fn probe(&mut self, budget: Duration) -> Result<()>;

    /// Passive declare. A "not found" reply is `Ok(false)`.
    async fn queue_exists(&mut self, name: &str) -> Result<bool>;

    async fn declare_queue(&mut self, spec: &QueueSpec) -> Result<()>;

    /// Publish to the default exchange with `routing_key` as queue name
    async fn publish(&mut self, message: &OutboundMessage) -> Result<()>;

    /// Close channel and connection; errors are logged, not returned
    async fn close(&mut self);
}
