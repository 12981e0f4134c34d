//! Outbound message envelope

use chrono::{DateTime, Utc};
use serde::Serialize;

/// AMQP delivery mode for messages that survive a broker restart
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Traceability headers attached to every message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeaders {
    /// Client identifier of the publishing gateway
    pub sender: String,
    /// `host:port` of the node the message was handed to
    pub cluster_node: String,
}

/// A serialized message ready to go on the wire
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub routing_key: String,
    pub body: Vec<u8>,
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    pub delivery_mode: u8,
    pub content_type: &'static str,
    pub headers: MessageHeaders,
}

impl OutboundMessage {
    /// Serialize `body` as compact UTF-8 JSON and wrap it in a persistent envelope
    pub fn json<T: Serialize + ?Sized>(
        routing_key: &str,
        body: &T,
        priority: u8,
        headers: MessageHeaders,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            routing_key: routing_key.to_string(),
            body: serde_json::to_vec(body)?,
            priority,
            created_at: Utc::now(),
            delivery_mode: PERSISTENT_DELIVERY_MODE,
            content_type: CONTENT_TYPE_JSON,
            headers,
        })
    }

    /// Creation time as unix seconds, the unit of the AMQP timestamp property
    pub fn timestamp(&self) -> u64 {
        self.created_at.timestamp().max(0) as u64
    }
}
