use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Publishes raw payloads to JetStream subjects
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait JetStreamPublisher: Send + Sync {
    /// Publish a payload and wait for the stream acknowledgment
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()>;
}
