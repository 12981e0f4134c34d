//! Sharing one publisher between tasks

use async_trait::async_trait;
use cg_common::ClusterStatus;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::publisher::Publisher;
use crate::status::StatusReporter;
use crate::Result;

/// What the HTTP front needs from the broker side
#[async_trait]
pub trait QueuePublisher: Send + Sync {
    /// Publish `body` to `queue` with the configured retry budget
    async fn publish(&self, queue: &str, priority: u8, body: &Value) -> Result<()>;

    fn cluster_status(&self) -> ClusterStatus;
}

/// A `Publisher` behind an async mutex.
///
/// Sends are single-flight: concurrent callers queue on the lock and are
/// served one at a time over the one channel, which keeps per-channel FIFO
/// ordering. Status reads never wait on the lock; when no send is in flight
/// they first check the session itself, otherwise the send keeps the state
/// current.
pub struct SharedPublisher {
    inner: Mutex<Publisher>,
    reporter: StatusReporter,
}

impl SharedPublisher {
    pub fn new(publisher: Publisher) -> Self {
        let reporter = publisher.status_reporter();
        Self {
            inner: Mutex::new(publisher),
            reporter,
        }
    }

    pub fn reporter(&self) -> StatusReporter {
        self.reporter.clone()
    }

    /// Waits for any in-flight send, then closes the connection
    pub async fn close(&self) {
        self.inner.lock().await.close().await;
    }
}

#[async_trait]
impl QueuePublisher for SharedPublisher {
    async fn publish(&self, queue: &str, priority: u8, body: &Value) -> Result<()> {
        let mut publisher = self.inner.lock().await;
        publisher.send_default(queue, body, priority).await
    }

    fn cluster_status(&self) -> ClusterStatus {
        if let Ok(publisher) = self.inner.try_lock() {
            publisher.connections().refresh_connected();
        }
        self.reporter.snapshot()
    }
}
