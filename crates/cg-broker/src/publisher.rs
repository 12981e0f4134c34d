//! Publisher - persistent, priority-tagged publishing with retry and failover

use std::sync::Arc;
use std::time::Duration;

use cg_common::ClusterStatus;
use cg_config::{GatewayConfig, PriorityLevels};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::connection::ConnectionManager;
use crate::error::BrokerError;
use crate::message::{MessageHeaders, OutboundMessage};
use crate::queue::{QueueOverrides, QueueProvisioner};
use crate::status::StatusReporter;
use crate::transport::BrokerConnector;
use crate::Result;

/// Delay before retry number `attempt + 1`: `base * 2^attempt`
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

/// Publishing behaviour independent of the connection layer
#[derive(Debug, Clone)]
pub struct PublishSettings {
    /// Value of the `sender` header
    pub sender_id: String,
    pub base_delay: Duration,
    pub max_retries: u32,
    pub priorities: PriorityLevels,
    /// Applied when declaring a queue for a high priority message
    pub high_priority_overrides: QueueOverrides,
}

impl PublishSettings {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            sender_id: config.broker.sender_id.clone(),
            base_delay: config.broker.retry_delay(),
            max_retries: config.broker.max_publish_retries,
            priorities: config.priorities,
            high_priority_overrides: QueueOverrides::from(&config.quorum.high_priority),
        }
    }
}

/// One client instance: one connection, one channel, one message at a time.
///
/// Every operation takes `&mut self`; see `SharedPublisher` for sharing an
/// instance between tasks.
pub struct Publisher {
    connections: ConnectionManager,
    provisioner: QueueProvisioner,
    settings: PublishSettings,
}

impl Publisher {
    pub fn new(connections: ConnectionManager, provisioner: QueueProvisioner, settings: PublishSettings) -> Self {
        Self {
            connections,
            provisioner,
            settings,
        }
    }

    pub fn from_config(config: &GatewayConfig, connector: Arc<dyn BrokerConnector>) -> Self {
        Self::new(
            ConnectionManager::from_config(&config.broker, connector),
            QueueProvisioner::new(config.quorum.clone()),
            PublishSettings::from_config(config),
        )
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn connections_mut(&mut self) -> &mut ConnectionManager {
        &mut self.connections
    }

    pub fn settings(&self) -> &PublishSettings {
        &self.settings
    }

    pub fn status_reporter(&self) -> StatusReporter {
        StatusReporter::from(&self.connections)
    }

    pub fn status(&self) -> ClusterStatus {
        self.connections.refresh_connected();
        self.status_reporter().snapshot()
    }

    /// Connect eagerly instead of on the first send
    pub async fn connect(&mut self) -> Result<usize> {
        self.connections.connect().await
    }

    /// Queue arguments to use for a message of `priority`
    pub fn overrides_for(&self, priority: u8) -> QueueOverrides {
        if self.settings.priorities.is_high(priority) {
            self.settings.high_priority_overrides.clone()
        } else {
            QueueOverrides::none()
        }
    }

    pub async fn queue_exists(&mut self, name: &str) -> Result<bool> {
        self.connections.ensure_connection().await?;
        let session = self.connections.session_mut()?;
        self.provisioner.exists(session, name).await
    }

    pub async fn ensure_queue(&mut self, name: &str, overrides: &QueueOverrides) -> Result<bool> {
        self.connections.ensure_connection().await?;
        let session = self.connections.session_mut()?;
        self.provisioner.ensure(session, name, overrides).await
    }

    /// Publish with the configured retry budget
    pub async fn send_default<T>(&mut self, routing_key: &str, body: &T, priority: u8) -> Result<()>
    where
        T: Serialize + ?Sized + Sync,
    {
        let max_retries = self.settings.max_retries;
        self.send(routing_key, body, priority, max_retries).await
    }

    /// Publish `body` as JSON to the queue named `routing_key`.
    ///
    /// Makes up to `max_retries + 1` attempts. After a failed attempt the
    /// session is dropped and the node demoted, so the next attempt fails over
    /// when another node is reachable.
    pub async fn send<T>(&mut self, routing_key: &str, body: &T, priority: u8, max_retries: u32) -> Result<()>
    where
        T: Serialize + ?Sized + Sync,
    {
        let mut last_error = String::new();

        for attempt in 0..=max_retries {
            metrics::counter!("gateway_publish_attempts_total").increment(1);

            match self.attempt(routing_key, body, priority).await {
                Ok(node) => {
                    metrics::counter!("gateway_messages_published_total").increment(1);
                    debug!(queue = %routing_key, node = %node, priority, attempt, "Message sent");
                    return Ok(());
                }
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => {
                    metrics::counter!("gateway_publish_failures_total").increment(1);
                    error!(
                        queue = %routing_key,
                        attempt = attempt + 1,
                        max_attempts = max_retries.saturating_add(1),
                        error = %e,
                        "Failed to send message"
                    );
                    last_error = e.to_string();
                    self.connections.fail_over().await;

                    if attempt < max_retries {
                        let delay = backoff_delay(self.settings.base_delay, attempt);
                        info!(delay = ?delay, "Retrying send");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(BrokerError::RetriesExhausted {
            attempts: max_retries.saturating_add(1),
            last_error,
        })
    }

    /// One publish attempt. Returns the `host:port` of the node used.
    async fn attempt<T>(&mut self, routing_key: &str, body: &T, priority: u8) -> Result<String>
    where
        T: Serialize + ?Sized + Sync,
    {
        self.connections.ensure_connection().await?;
        let overrides = self.overrides_for(priority);
        let node = self
            .connections
            .current_node()
            .map(|n| n.key())
            .ok_or(BrokerError::NotConnected)?;

        let session = self.connections.session_mut()?;
        self.provisioner.ensure(session, routing_key, &overrides).await?;

        let headers = MessageHeaders {
            sender: self.settings.sender_id.clone(),
            cluster_node: node.clone(),
        };
        let message = OutboundMessage::json(routing_key, body, priority, headers)?;
        session.publish(&message).await?;
        Ok(node)
    }

    pub async fn close(&mut self) {
        self.connections.close().await;
    }
}
