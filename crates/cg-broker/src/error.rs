//! Broker client error types

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    /// Every configured node failed during one connect pass
    #[error("No reachable broker node ({attempted} attempted)")]
    NoReachableNode { attempted: usize },

    #[error("Connection error on {node}: {message}")]
    Connection { node: String, message: String },

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Broker rejected publish to {routing_key}")]
    Nack { routing_key: String },

    #[error("Not connected to any broker node")]
    NotConnected,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// All publish attempts failed; delivery is not confirmed
    #[error("Delivery not confirmed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl BrokerError {
    pub fn connection(node: impl Into<String>, message: impl ToString) -> Self {
        Self::Connection {
            node: node.into(),
            message: message.to_string(),
        }
    }

    pub fn channel(message: impl ToString) -> Self {
        Self::Channel(message.to_string())
    }

    /// Errors that end the current operation instead of being retried
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BrokerError::RetriesExhausted { .. } | BrokerError::Serialization(_)
        )
    }
}
