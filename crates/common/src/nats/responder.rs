use anyhow::{bail, Context, Result};
use async_nats::{Client, Message};
use bytes::Bytes;
use futures::{future::BoxFuture, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Turns a raw request body into a raw reply body. Failures are encoded in
/// the reply; the responder never drops a request silently.
pub type RequestHandler = Arc<dyn Fn(Bytes) -> BoxFuture<'static, Bytes> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct NatsResponderConfig {
    pub subject: String,
    /// Instances sharing a queue group split the requests between them
    pub queue_group: String,
    pub max_in_flight: usize,
}

/// Core NATS request/reply endpoint
pub struct NatsResponder {
    client: Client,
    subscriber: async_nats::Subscriber,
    config: NatsResponderConfig,
    handler: RequestHandler,
}

impl NatsResponder {
    pub async fn new(
        client: &Client,
        config: NatsResponderConfig,
        handler: RequestHandler,
    ) -> Result<Self> {
        let subscriber = client
            .queue_subscribe(config.subject.clone(), config.queue_group.clone())
            .await
            .with_context(|| format!("Failed to subscribe to {}", config.subject))?;

        info!(
            subject = %config.subject,
            queue_group = %config.queue_group,
            "Responder ready"
        );

        Ok(Self {
            client: client.clone(),
            subscriber,
            config,
            handler,
        })
    }

    /// Serve until cancelled; in-flight requests are answered before returning
    pub async fn run(self, ctx: CancellationToken) -> Result<()> {
        let Self {
            client,
            subscriber,
            config,
            handler,
        } = self;

        subscriber
            .take_until(ctx.clone().cancelled_owned())
            .for_each_concurrent(config.max_in_flight.max(1), |message| {
                let client = client.clone();
                let handler = Arc::clone(&handler);
                async move { respond(&client, &handler, message).await }
            })
            .await;

        if !ctx.is_cancelled() {
            bail!("subscription to {} closed", config.subject);
        }

        info!(subject = %config.subject, "Responder stopped");
        Ok(())
    }
}

async fn respond(client: &Client, handler: &RequestHandler, message: Message) {
    let Some(reply) = message.reply else {
        warn!(subject = %message.subject, "Request without reply subject, dropping");
        return;
    };

    debug!(subject = %message.subject, payload_size = message.payload.len(), "Handling request");
    let response = handler(message.payload).await;

    if let Err(e) = client.publish(reply, response).await {
        error!(error = %e, subject = %message.subject, "Failed to publish reply");
    }
}
