use anyhow::{Context, Result};
use async_nats::jetstream::{self, consumer::PullConsumer, AckKind, Message};
use futures::{future::BoxFuture, StreamExt};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Per-message verdict for a fetched batch, by index into the batch
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ProcessingResult {
    pub ack: Vec<usize>,
    /// Redelivered later; the optional text is logged
    pub nak: Vec<(usize, Option<String>)>,
}

impl ProcessingResult {
    pub fn ack_all(count: usize) -> Self {
        Self {
            ack: (0..count).collect(),
            nak: Vec::new(),
        }
    }

    pub fn nak_all(count: usize, error: Option<String>) -> Self {
        Self {
            ack: Vec::new(),
            nak: (0..count).map(|i| (i, error.clone())).collect(),
        }
    }

    pub fn new(ack: Vec<usize>, nak: Vec<(usize, Option<String>)>) -> Self {
        Self { ack, nak }
    }
}

/// Decodes and handles a batch of raw messages
pub type BatchProcessor =
    Box<dyn Fn(&[Message]) -> BoxFuture<'static, Result<ProcessingResult>> + Send + Sync>;

/// Durable pull consumer settings
#[derive(Debug, Clone)]
pub struct NatsConsumerConfig {
    pub stream_name: String,
    pub consumer_name: String,
    pub subject_filter: String,
    pub batch_size: usize,
    pub max_wait: Duration,
}

/// Pulls batches from a durable JetStream consumer and settles each message
/// according to the processor's verdict
pub struct NatsConsumer {
    consumer: PullConsumer,
    config: NatsConsumerConfig,
    processor: BatchProcessor,
}

impl NatsConsumer {
    pub async fn new(
        jetstream: &jetstream::Context,
        config: NatsConsumerConfig,
        processor: BatchProcessor,
    ) -> Result<Self> {
        let consumer = jetstream
            .create_consumer_on_stream(
                jetstream::consumer::pull::Config {
                    name: Some(config.consumer_name.clone()),
                    durable_name: Some(config.consumer_name.clone()),
                    filter_subject: config.subject_filter.clone(),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    ..Default::default()
                },
                config.stream_name.as_str(),
            )
            .await
            .context("Failed to create consumer")?;

        info!(
            stream = %config.stream_name,
            consumer = %config.consumer_name,
            subject = %config.subject_filter,
            "Consumer ready"
        );

        Ok(Self {
            consumer,
            config,
            processor,
        })
    }

    pub async fn run(&self, ctx: CancellationToken) -> Result<()> {
        info!(consumer = %self.config.consumer_name, "Starting consumer loop");

        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                result = self.fetch_and_process_batch() => {
                    if let Err(e) = result {
                        error!(error = %e, "Error processing batch");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }

        info!(consumer = %self.config.consumer_name, "Consumer stopped");
        Ok(())
    }

    async fn fetch_and_process_batch(&self) -> Result<()> {
        let mut stream = self
            .consumer
            .fetch()
            .max_messages(self.config.batch_size)
            .expires(self.config.max_wait)
            .messages()
            .await
            .context("Failed to fetch messages")?;

        let mut batch = Vec::new();
        while let Some(result) = stream.next().await {
            match result {
                Ok(msg) => batch.push(msg),
                Err(e) => warn!(error = %e, "Error receiving message from batch"),
            }
        }

        if batch.is_empty() {
            return Ok(());
        }

        debug!(message_count = batch.len(), "Received message batch");

        let verdict = match (self.processor)(&batch).await {
            Ok(verdict) => verdict,
            Err(e) => {
                error!(error = %e, "Processor failed, rejecting whole batch");
                ProcessingResult::nak_all(batch.len(), Some(e.to_string()))
            }
        };

        settle(&batch, verdict).await;
        Ok(())
    }
}

async fn settle(batch: &[Message], verdict: ProcessingResult) {
    for idx in verdict.ack {
        let Some(msg) = batch.get(idx) else {
            warn!(message_index = idx, batch_size = batch.len(), "Ack index out of range");
            continue;
        };
        if let Err(e) = msg.ack().await {
            error!(error = %e, message_index = idx, "Failed to acknowledge message");
        }
    }

    for (idx, reason) in verdict.nak {
        let Some(msg) = batch.get(idx) else {
            warn!(message_index = idx, batch_size = batch.len(), "Nak index out of range");
            continue;
        };
        warn!(
            message_index = idx,
            subject = %msg.subject,
            reason = reason.as_deref().unwrap_or("unspecified"),
            "Rejecting message for redelivery"
        );
        if let Err(e) = msg.ack_with(AckKind::Nak(None)).await {
            error!(error = %e, message_index = idx, "Failed to reject message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_all_covers_every_index() {
        let result = ProcessingResult::ack_all(3);
        assert_eq!(result.ack, vec![0, 1, 2]);
        assert!(result.nak.is_empty());
    }

    #[test]
    fn test_nak_all_carries_reason() {
        let result = ProcessingResult::nak_all(2, Some("store down".to_string()));
        assert!(result.ack.is_empty());
        assert_eq!(
            result.nak,
            vec![
                (0, Some("store down".to_string())),
                (1, Some("store down".to_string()))
            ]
        );
    }
}
