use async_trait::async_trait;
use common::domain::{DomainError, DomainEvent, DomainResult, EventPublisher};
use common::nats::JetStreamPublisher;
use std::sync::Arc;
use tracing::{debug, info};

/// Subject suffix for events without a routing key
pub const BROADCAST_SUBJECT_SUFFIX: &str = "all";

/// Publishes domain events as JSON on `{base_subject}.{routing_key}`
pub struct ParserEventProducer {
    publisher: Arc<dyn JetStreamPublisher>,
    base_subject: String,
}

impl ParserEventProducer {
    pub fn new(publisher: Arc<dyn JetStreamPublisher>, base_subject: String) -> Self {
        info!(base_subject = %base_subject, "Created ParserEventProducer");
        Self {
            publisher,
            base_subject,
        }
    }

    /// The routing key must be a single subject token, so one owner's
    /// events never land on another subject or a wildcard.
    pub fn subject_for(&self, event: &DomainEvent) -> DomainResult<String> {
        let token = match event.routing_key.as_deref() {
            Some(key) if is_subject_token(key) => key,
            Some(key) => {
                return Err(DomainError::ValidationError(format!(
                    "routing key {key:?} is not a valid subject token"
                )));
            }
            None => BROADCAST_SUBJECT_SUFFIX,
        };

        Ok(format!("{}.{}", self.base_subject, token))
    }
}

fn is_subject_token(key: &str) -> bool {
    !key.is_empty()
        && !key
            .chars()
            .any(|c| matches!(c, '.' | '*' | '>') || c.is_whitespace())
}

#[async_trait]
impl EventPublisher for ParserEventProducer {
    async fn publish(&self, event: &DomainEvent) -> DomainResult<()> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| DomainError::RepositoryError(anyhow::Error::new(e)))?;
        let subject = self.subject_for(event)?;

        debug!(
            subject = %subject,
            action = %event.action,
            size_bytes = payload.len(),
            "Publishing domain event"
        );

        self.publisher
            .publish(subject, payload.into())
            .await
            .map_err(DomainError::RepositoryError)
    }
}
