//! Idempotent provisioning of replicated (quorum) queues

use std::collections::HashSet;

use cg_config::{MemoryBounds, QuorumConfig};
use tracing::{debug, info};

use crate::transport::BrokerSession;
use crate::Result;

pub const ARG_QUEUE_TYPE: &str = "x-queue-type";
pub const ARG_INITIAL_GROUP_SIZE: &str = "x-quorum-initial-group-size";
pub const ARG_DELIVERY_LIMIT: &str = "x-delivery-limit";
pub const ARG_MAX_IN_MEMORY_LENGTH: &str = "x-max-in-memory-length";
pub const ARG_MAX_IN_MEMORY_BYTES: &str = "x-max-in-memory-bytes";

/// Value of a queue declaration argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueArgument {
    Str(String),
    Int(i64),
}

/// Full declaration of a destination queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    /// Quorum queue replicated across broker nodes
    pub replicated: bool,
    pub initial_group_size: u32,
    pub delivery_limit: u32,
    pub max_in_memory_length: u64,
    pub max_in_memory_bytes: u64,
}

impl QueueSpec {
    /// Declaration arguments in wire order
    pub fn arguments(&self) -> Vec<(&'static str, QueueArgument)> {
        let mut args = Vec::with_capacity(5);
        if self.replicated {
            args.push((ARG_QUEUE_TYPE, QueueArgument::Str("quorum".to_string())));
            args.push((ARG_INITIAL_GROUP_SIZE, QueueArgument::Int(self.initial_group_size as i64)));
        }
        args.push((ARG_DELIVERY_LIMIT, QueueArgument::Int(self.delivery_limit as i64)));
        args.push((ARG_MAX_IN_MEMORY_LENGTH, QueueArgument::Int(to_i64(self.max_in_memory_length))));
        args.push((ARG_MAX_IN_MEMORY_BYTES, QueueArgument::Int(to_i64(self.max_in_memory_bytes))));
        args
    }

    pub fn argument(&self, key: &str) -> Option<QueueArgument> {
        self.arguments()
            .into_iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Per-call adjustments merged over the configured defaults
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueOverrides {
    pub initial_group_size: Option<u32>,
    pub delivery_limit: Option<u32>,
    pub max_in_memory_length: Option<u64>,
    pub max_in_memory_bytes: Option<u64>,
}

impl QueueOverrides {
    pub fn none() -> Self {
        Self::default()
    }
}

impl From<&MemoryBounds> for QueueOverrides {
    fn from(bounds: &MemoryBounds) -> Self {
        Self {
            max_in_memory_length: bounds.max_in_memory_length,
            max_in_memory_bytes: bounds.max_in_memory_bytes,
            ..Default::default()
        }
    }
}

/// Makes sure destination queues exist before publishing.
///
/// Queues confirmed to exist are remembered for the lifetime of the
/// provisioner, so an existing queue is never declared again with different
/// arguments.
pub struct QueueProvisioner {
    defaults: QuorumConfig,
    confirmed: HashSet<String>,
}

impl QueueProvisioner {
    pub fn new(defaults: QuorumConfig) -> Self {
        Self {
            defaults,
            confirmed: HashSet::new(),
        }
    }

    pub fn defaults(&self) -> &QuorumConfig {
        &self.defaults
    }

    pub fn spec_for(&self, name: &str, overrides: &QueueOverrides) -> QueueSpec {
        QueueSpec {
            name: name.to_string(),
            durable: true,
            exclusive: false,
            auto_delete: false,
            replicated: true,
            initial_group_size: overrides.initial_group_size.unwrap_or(self.defaults.initial_group_size),
            delivery_limit: overrides.delivery_limit.unwrap_or(self.defaults.delivery_limit),
            max_in_memory_length: overrides.max_in_memory_length.unwrap_or(self.defaults.max_in_memory_length),
            max_in_memory_bytes: overrides.max_in_memory_bytes.unwrap_or(self.defaults.max_in_memory_bytes),
        }
    }

    pub fn is_confirmed(&self, name: &str) -> bool {
        self.confirmed.contains(name)
    }

    /// Passive existence check against the broker
    pub async fn exists(&mut self, session: &mut dyn BrokerSession, name: &str) -> Result<bool> {
        let exists = session.queue_exists(name).await?;
        if exists {
            self.confirmed.insert(name.to_string());
        }
        debug!(queue = %name, exists, "Queue existence checked");
        Ok(exists)
    }

    /// Declare `name` unless it already exists. Returns whether a declaration was sent.
    pub async fn ensure(
        &mut self,
        session: &mut dyn BrokerSession,
        name: &str,
        overrides: &QueueOverrides,
    ) -> Result<bool> {
        if self.is_confirmed(name) {
            return Ok(false);
        }

        if self.exists(session, name).await? {
            return Ok(false);
        }

        let spec = self.spec_for(name, overrides);
        session.declare_queue(&spec).await?;
        self.confirmed.insert(name.to_string());

        metrics::counter!("gateway_queues_declared_total").increment(1);
        info!(
            queue = %name,
            delivery_limit = spec.delivery_limit,
            max_in_memory_length = spec.max_in_memory_length,
            max_in_memory_bytes = spec.max_in_memory_bytes,
            "Quorum queue declared"
        );
        Ok(true)
    }
}
