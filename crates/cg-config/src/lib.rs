//! CDL Gateway configuration
//!
//! Configuration is read from an optional TOML file and then overridden by
//! environment variables, so container deployments can keep configuring
//! the broker through `RABBITMQ_*` variables:
//!
//! ```toml
//! [broker]
//! sender_id = "cdl-gateway"
//! retry_attempts = 3
//!
//! [[broker.nodes]]
//! host = "rabbit-1"
//! port = 5672
//! username = "app"
//! password = "secret"
//!
//! [quorum]
//! delivery_limit = 5
//! ```

use std::path::Path;
use std::time::Duration;

use cg_common::BrokerNode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub broker: BrokerConfig,
    pub quorum: QuorumConfig,
    pub priorities: PriorityLevels,
    pub routing: RoutingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Broker cluster connection and retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub nodes: Vec<BrokerNode>,
    /// Value of the `sender` header on every published message
    pub sender_id: String,
    pub connection_timeout_secs: u64,
    pub heartbeat_secs: u16,
    /// Consecutive failures before a node's circuit breaker opens
    pub retry_attempts: u32,
    /// Base delay for publish backoff (`delay * 2^attempt`)
    pub retry_delay_ms: u64,
    /// Default number of publish retries after the first attempt
    pub max_publish_retries: u32,
    pub breaker_cooldown_secs: u64,
    /// Time budget for the liveness probe run before every use
    pub probe_timeout_ms: u64,
    pub publisher_confirms: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            nodes: vec![BrokerNode::new("localhost", 5672, "guest", "guest")],
            sender_id: "cdl-gateway".to_string(),
            connection_timeout_secs: 10,
            heartbeat_secs: 60,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            max_publish_retries: 3,
            breaker_cooldown_secs: 300,
            probe_timeout_ms: 1000,
            publisher_confirms: true,
        }
    }
}

impl BrokerConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.breaker_cooldown_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Default arguments for quorum queues declared by the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuorumConfig {
    pub initial_group_size: u32,
    pub delivery_limit: u32,
    pub max_in_memory_length: u64,
    pub max_in_memory_bytes: u64,
    /// Memory bounds applied to queues receiving high priority messages
    pub high_priority: MemoryBounds,
}

impl Default for QuorumConfig {
    fn default() -> Self {
        Self {
            initial_group_size: 3,
            delivery_limit: 5,
            max_in_memory_length: 10_000,
            max_in_memory_bytes: 104_857_600,
            high_priority: MemoryBounds {
                max_in_memory_length: Some(50_000),
                max_in_memory_bytes: Some(200_000_000),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryBounds {
    pub max_in_memory_length: Option<u64>,
    pub max_in_memory_bytes: Option<u64>,
}

/// Numeric AMQP priorities for the business priority levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityLevels {
    pub high: u8,
    pub medium: u8,
    pub low: u8,
}

impl Default for PriorityLevels {
    fn default() -> Self {
        Self { high: 1, medium: 2, low: 9 }
    }
}

impl PriorityLevels {
    pub fn is_high(&self, priority: u8) -> bool {
        priority == self.high
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub default_queue: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_queue: "sokind".to_string(),
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

impl GatewayConfig {
    /// Load configuration from an optional TOML file plus process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                debug!("No config file given, using defaults");
                Self::default()
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        info!(path = %path.display(), "Loaded configuration file");
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply environment-style overrides.
    ///
    /// `RABBITMQ_NODES` (comma separated `host:port`) replaces the node list;
    /// otherwise `RABBITMQ_HOSTNAME`/`RABBITMQ_PORT` replace it with a single
    /// node. `RABBITMQ_USER`/`RABBITMQ_PASSWORD` apply to every node.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(nodes) = lookup("RABBITMQ_NODES") {
            self.broker.nodes = parse_node_list(&nodes)?;
        } else if let Some(host) = lookup("RABBITMQ_HOSTNAME") {
            let port = match lookup("RABBITMQ_PORT") {
                Some(port) => parse_env("RABBITMQ_PORT", &port)?,
                None => 5672,
            };
            self.broker.nodes = vec![BrokerNode::new(host, port, "guest", "guest")];
        }

        if let Some(user) = lookup("RABBITMQ_USER") {
            for node in &mut self.broker.nodes {
                node.username = user.clone();
            }
        }
        if let Some(password) = lookup("RABBITMQ_PASSWORD") {
            for node in &mut self.broker.nodes {
                node.password = password.clone();
            }
        }

        if let Some(sender) = lookup("SENDER_ID") {
            self.broker.sender_id = sender;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level.to_lowercase();
        }
        if let Some(port) = lookup("API_PORT") {
            self.server.port = parse_env("API_PORT", &port)?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.broker.nodes.is_empty() {
            return Err(ConfigError::Invalid("at least one broker node is required".to_string()));
        }
        if let Some(node) = self.broker.nodes.iter().find(|n| n.host.is_empty() || n.port == 0) {
            return Err(ConfigError::Invalid(format!("invalid broker node address {}", node.key())));
        }
        if self.broker.retry_attempts == 0 {
            return Err(ConfigError::Invalid("broker.retry_attempts must be at least 1".to_string()));
        }
        if self.quorum.initial_group_size == 0 {
            return Err(ConfigError::Invalid("quorum.initial_group_size must be at least 1".to_string()));
        }
        if self.routing.default_queue.is_empty() {
            return Err(ConfigError::Invalid("routing.default_queue must not be empty".to_string()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_node_list(value: &str) -> Result<Vec<BrokerNode>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (host, port) = match entry.rsplit_once(':') {
                Some((host, port)) => (host, parse_env("RABBITMQ_NODES", port)?),
                None => (entry, 5672),
            };
            Ok(BrokerNode::new(host, port, "guest", "guest"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.broker.nodes.len(), 1);
        assert_eq!(config.broker.retry_attempts, 3);
        assert_eq!(config.broker.breaker_cooldown(), Duration::from_secs(300));
        assert_eq!(config.quorum.delivery_limit, 5);
        assert_eq!(config.priorities, PriorityLevels { high: 1, medium: 2, low: 9 });
        assert_eq!(config.routing.default_queue, "sokind");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml_with_nodes() {
        let config = GatewayConfig::from_toml(
            r#"
            [broker]
            retry_attempts = 5
            retry_delay_ms = 250

            [[broker.nodes]]
            host = "rabbit-1"
            port = 5672
            username = "app"
            password = "pw"

            [[broker.nodes]]
            host = "rabbit-2"
            port = 5673

            [quorum]
            delivery_limit = 10

            [quorum.high_priority]
            max_in_memory_bytes = 300000000
            "#,
        )
        .unwrap();

        assert_eq!(config.broker.nodes.len(), 2);
        assert_eq!(config.broker.nodes[0].username, "app");
        assert_eq!(config.broker.nodes[1].username, "guest");
        assert_eq!(config.broker.retry_attempts, 5);
        assert_eq!(config.broker.retry_delay(), Duration::from_millis(250));
        // Unset fields keep their defaults
        assert_eq!(config.broker.connection_timeout_secs, 10);
        assert_eq!(config.quorum.delivery_limit, 10);
        assert_eq!(config.quorum.initial_group_size, 3);
        assert_eq!(config.quorum.high_priority.max_in_memory_bytes, Some(300_000_000));
        assert_eq!(config.quorum.high_priority.max_in_memory_length, None);
    }

    #[test]
    fn test_example_config_parses() {
        let config = GatewayConfig::from_toml(include_str!("../../../gateway.example.toml")).unwrap();
        assert_eq!(config.broker.nodes.len(), 3);
        assert_eq!(config.broker.nodes[2].key(), "rabbit-3:5672");
        assert_eq!(config.quorum.high_priority.max_in_memory_bytes, Some(200_000_000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_toml() {
        let result = GatewayConfig::from_toml("[broker\nretry_attempts = ");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 9000\n").unwrap();

        let config = GatewayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn test_missing_file() {
        let result = GatewayConfig::from_file(Path::new("/nonexistent/gateway.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_node_list_override() {
        let mut config = GatewayConfig::default();
        config
            .apply_overrides(lookup_from(&[
                ("RABBITMQ_NODES", "r1:5672, r2:5673,r3"),
                ("RABBITMQ_USER", "app"),
                ("RABBITMQ_PASSWORD", "pw"),
            ]))
            .unwrap();

        let keys: Vec<String> = config.broker.nodes.iter().map(|n| n.key()).collect();
        assert_eq!(keys, vec!["r1:5672", "r2:5673", "r3:5672"]);
        assert!(config.broker.nodes.iter().all(|n| n.username == "app" && n.password == "pw"));
    }

    #[test]
    fn test_single_host_override() {
        let mut config = GatewayConfig::default();
        config
            .apply_overrides(lookup_from(&[
                ("RABBITMQ_HOSTNAME", "mq.internal"),
                ("RABBITMQ_PORT", "5671"),
                ("LOG_LEVEL", "DEBUG"),
                ("API_PORT", "8080"),
            ]))
            .unwrap();

        assert_eq!(config.broker.nodes.len(), 1);
        assert_eq!(config.broker.nodes[0].key(), "mq.internal:5671");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_invalid_port_override() {
        let mut config = GatewayConfig::default();
        let result = config.apply_overrides(lookup_from(&[
            ("RABBITMQ_HOSTNAME", "mq"),
            ("RABBITMQ_PORT", "not-a-port"),
        ]));
        assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })));
    }

    #[test]
    fn test_validate_rejects_empty_nodes() {
        let mut config = GatewayConfig::default();
        config.broker.nodes.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let mut config = GatewayConfig::default();
        config.broker.retry_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_is_high_priority() {
        let levels = PriorityLevels::default();
        assert!(levels.is_high(1));
        assert!(!levels.is_high(2));
        assert!(!levels.is_high(9));
    }
}
