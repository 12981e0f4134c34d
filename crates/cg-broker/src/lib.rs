//! CDL Gateway broker client
//!
//! Keeps one connection to one of several interchangeable broker nodes and
//! publishes persistent, priority-tagged JSON messages to quorum queues:
//!
//! - `node` / `breaker`: per-node health and the circuit breaker gating reconnects
//! - `connection`: node selection, failover and liveness checks
//! - `queue`: idempotent quorum queue provisioning
//! - `publisher`: retry with exponential backoff
//! - `status`: read-only health snapshots
//! - `shared`: single-flight sharing between tasks
//!
//! The AMQP transport (`amqp`, lapin) is behind the `amqp` feature; everything
//! else only depends on the traits in `transport`.

pub mod breaker;
pub mod connection;
pub mod error;
pub mod message;
pub mod node;
pub mod publisher;
pub mod queue;
pub mod shared;
pub mod status;
pub mod transport;

#[cfg(feature = "amqp")]
pub mod amqp;

#[cfg(test)]
mod mock;

pub use breaker::CircuitBreaker;
pub use connection::ConnectionManager;
pub use error::BrokerError;
pub use message::{MessageHeaders, OutboundMessage};
pub use node::{ClusterState, NodeHealth, NodeRegistry};
pub use publisher::{backoff_delay, PublishSettings, Publisher};
pub use queue::{QueueOverrides, QueueProvisioner, QueueSpec};
pub use shared::{QueuePublisher, SharedPublisher};
pub use status::StatusReporter;
pub use transport::{BrokerConnector, BrokerSession, ConnectOptions};

#[cfg(feature = "amqp")]
pub use amqp::LapinConnector;

pub type Result<T> = std::result::Result<T, BrokerError>;
