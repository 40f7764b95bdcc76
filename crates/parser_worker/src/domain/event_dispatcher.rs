use common::domain::{DomainEvent, EventPublisher};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Enqueues domain events without waiting for the bus.
///
/// Delivery is at most once: a full queue drops the event, and publish
/// failures are only logged by [`EventDispatchWorker`].
#[derive(Clone)]
pub struct EventDispatcher {
    sender: mpsc::Sender<DomainEvent>,
}

impl EventDispatcher {
    /// Dispatcher plus the worker that drains it
    pub fn channel(
        capacity: usize,
        publisher: Arc<dyn EventPublisher>,
    ) -> (Self, EventDispatchWorker) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self { sender },
            EventDispatchWorker {
                receiver,
                publisher,
            },
        )
    }

    pub fn dispatch(&self, event: DomainEvent) {
        let action = event.action;
        match self.sender.try_send(event) {
            Ok(()) => debug!(action = %action, "Queued domain event"),
            Err(TrySendError::Full(event)) => warn!(
                event = %event.event,
                action = %event.action,
                "Event queue full, dropping event"
            ),
            Err(TrySendError::Closed(event)) => warn!(
                event = %event.event,
                action = %event.action,
                "Event worker stopped, dropping event"
            ),
        }
    }
}

/// Background publisher for queued events
pub struct EventDispatchWorker {
    receiver: mpsc::Receiver<DomainEvent>,
    publisher: Arc<dyn EventPublisher>,
}

impl EventDispatchWorker {
    pub async fn run(mut self, ctx: CancellationToken) -> anyhow::Result<()> {
        info!("Starting event dispatch worker");

        loop {
            tokio::select! {
                biased;
                next = self.receiver.recv() => match next {
                    Some(event) => self.publish(event).await,
                    None => break,
                },
                _ = ctx.cancelled() => {
                    self.drain().await;
                    break;
                }
            }
        }

        info!("Event dispatch worker stopped");
        Ok(())
    }

    // Events already queued at shutdown still go out.
    async fn drain(&mut self) {
        self.receiver.close();
        while let Some(event) = self.receiver.recv().await {
            self.publish(event).await;
        }
    }

    async fn publish(&self, event: DomainEvent) {
        if let Err(e) = self.publisher.publish(&event).await {
            error!(
                error = %e,
                event = %event.event,
                action = %event.action,
                routing_key = event.routing_key.as_deref().unwrap_or(""),
                "Failed to publish domain event"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::domain::{DomainError, EventAction, ParserDefinition};
    use common::MockEventPublisher;

    fn event(action: EventAction) -> DomainEvent {
        let now = Utc::now();
        DomainEvent::parser(
            action,
            &ParserDefinition {
                id: "p-1".to_string(),
                user_id: "u-1".to_string(),
                name: "counter".to_string(),
                description: String::new(),
                function: "payload".to_string(),
                hidden: false,
                created_at: now,
                updated_at: now,
            },
        )
    }

    #[tokio::test]
    async fn test_queued_events_are_published_before_shutdown() {
        // Arrange
        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .withf(|e: &DomainEvent| e.action == EventAction::Create)
            .times(1)
            .returning(|_| Ok(()));
        publisher
            .expect_publish()
            .withf(|e: &DomainEvent| e.action == EventAction::Delete)
            .times(1)
            .returning(|_| Ok(()));

        let (dispatcher, worker) = EventDispatcher::channel(8, Arc::new(publisher));
        let ctx = CancellationToken::new();

        // Act
        dispatcher.dispatch(event(EventAction::Create));
        dispatcher.dispatch(event(EventAction::Delete));
        ctx.cancel();
        let result = worker.run(ctx).await;

        // Assert
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let mut publisher = MockEventPublisher::new();
        publisher.expect_publish().times(1).returning(|_| Ok(()));

        let (dispatcher, worker) = EventDispatcher::channel(1, Arc::new(publisher));

        dispatcher.dispatch(event(EventAction::Create));
        dispatcher.dispatch(event(EventAction::Update));

        let ctx = CancellationToken::new();
        ctx.cancel();
        worker.run(ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_stop_worker() {
        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .times(2)
            .returning(|_| Err(DomainError::RepositoryError(anyhow::anyhow!("bus down"))));

        let (dispatcher, worker) = EventDispatcher::channel(4, Arc::new(publisher));
        dispatcher.dispatch(event(EventAction::Create));
        dispatcher.dispatch(event(EventAction::Update));
        drop(dispatcher);

        let result = worker.run(CancellationToken::new()).await;
        assert!(result.is_ok());
    }
}
