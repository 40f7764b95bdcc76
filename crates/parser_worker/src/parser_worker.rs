use crate::domain::{
    BatchReparseConfig, BatchReparseService, EventDispatchWorker, EventDispatcher,
    ParsedPayloadGeolocationExtractor, ParserService, PayloadParserService,
    SandboxedPayloadEvaluator,
};
use crate::nats::{
    create_parser_command_processor, create_parser_request_handler, ParserRequestHandler,
};
use common::domain::{
    DeviceRepository, EventPublisher, GeolocationRepository, MessageRepository, ParserRepository,
};
use common::nats::{
    NatsClient, NatsConsumer, NatsConsumerConfig, NatsResponder, NatsResponderConfig,
};
use common::script::{RhaiSandbox, SandboxLimits, ScriptCache};
use parser_runner::AppProcess;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct ParserWorkerConfig {
    pub script_budget: Duration,
    pub script_cache_capacity: usize,
    pub sandbox_limits: SandboxLimits,
    pub batch: BatchReparseConfig,
    pub event_queue_capacity: usize,
}

/// Durable consumer settings for batch reparse commands
pub struct ParserCommandsConfig {
    pub stream: String,
    pub subject: String,
    pub consumer_name: String,
    pub batch_size: usize,
    pub batch_wait: Duration,
}

/// Request/reply endpoint for parser CRUD and payload trials
pub struct ParserRequestsConfig {
    pub subject: String,
    pub queue_group: String,
    pub max_in_flight: usize,
}

/// Storage the worker runs against
#[derive(Clone)]
pub struct ParserRepositories {
    pub parsers: Arc<dyn ParserRepository>,
    pub devices: Arc<dyn DeviceRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub geolocations: Arc<dyn GeolocationRepository>,
}

/// Wires the parsing pipeline together and exposes its long-running parts
/// as runner processes
pub struct ParserWorker {
    parser_service: Arc<ParserService>,
    payload_parser: Arc<PayloadParserService>,
    batch_service: Arc<BatchReparseService>,
    dispatch_worker: EventDispatchWorker,
    command_consumer: Option<NatsConsumer>,
    request_responder: Option<NatsResponder>,
    batch_cancel: CancellationToken,
}

impl ParserWorker {
    /// `batch_cancel` stops in-flight batch reparses; pass a child of the shutdown token
    pub fn new(
        repositories: ParserRepositories,
        event_publisher: Arc<dyn EventPublisher>,
        config: ParserWorkerConfig,
        batch_cancel: CancellationToken,
    ) -> Self {
        info!(
            script_budget_ms = config.script_budget.as_millis(),
            script_cache_capacity = config.script_cache_capacity,
            device_concurrency = config.batch.device_concurrency,
            "Initializing parser worker"
        );

        let cache = Arc::new(ScriptCache::new(
            config.script_cache_capacity,
            config.sandbox_limits,
        ));
        let evaluator = Arc::new(SandboxedPayloadEvaluator::new(
            cache,
            Arc::new(RhaiSandbox::new(config.sandbox_limits)),
            config.script_budget,
        ));

        let payload_parser = Arc::new(PayloadParserService::new(
            repositories.messages.clone(),
            evaluator,
        ));
        let geolocation_extractor = Arc::new(ParsedPayloadGeolocationExtractor::new(
            repositories.geolocations.clone(),
            repositories.messages.clone(),
        ));
        let batch_service = Arc::new(BatchReparseService::new(
            repositories.devices.clone(),
            repositories.parsers.clone(),
            repositories.messages.clone(),
            payload_parser.clone(),
            geolocation_extractor,
            config.batch,
        ));

        let (events, dispatch_worker) =
            EventDispatcher::channel(config.event_queue_capacity, event_publisher);
        let parser_service = Arc::new(ParserService::new(repositories.parsers, events));

        Self {
            parser_service,
            payload_parser,
            batch_service,
            dispatch_worker,
            command_consumer: None,
            request_responder: None,
            batch_cancel,
        }
    }

    /// Consume batch reparse commands from JetStream
    pub async fn with_command_consumer(
        mut self,
        nats_client: &NatsClient,
        config: ParserCommandsConfig,
    ) -> anyhow::Result<Self> {
        let processor =
            create_parser_command_processor(self.batch_service.clone(), self.batch_cancel.clone());

        let consumer = NatsConsumer::new(
            nats_client.jetstream(),
            NatsConsumerConfig {
                stream_name: config.stream,
                consumer_name: config.consumer_name,
                subject_filter: config.subject,
                batch_size: config.batch_size,
                max_wait: config.batch_wait,
            },
            processor,
        )
        .await?;

        self.command_consumer = Some(consumer);
        Ok(self)
    }

    /// Answer parser requests over core NATS request/reply
    pub async fn with_request_responder(
        mut self,
        nats_client: &NatsClient,
        config: ParserRequestsConfig,
    ) -> anyhow::Result<Self> {
        let handler = Arc::new(ParserRequestHandler::new(
            self.parser_service.clone(),
            self.payload_parser.clone(),
        ));

        let responder = NatsResponder::new(
            nats_client.client(),
            NatsResponderConfig {
                subject: config.subject,
                queue_group: config.queue_group,
                max_in_flight: config.max_in_flight,
            },
            create_parser_request_handler(handler),
        )
        .await?;

        self.request_responder = Some(responder);
        Ok(self)
    }

    pub fn parser_service(&self) -> Arc<ParserService> {
        self.parser_service.clone()
    }

    pub fn payload_parser(&self) -> Arc<PayloadParserService> {
        self.payload_parser.clone()
    }

    pub fn batch_service(&self) -> Arc<BatchReparseService> {
        self.batch_service.clone()
    }

    pub fn into_runner_processes(self) -> Vec<(&'static str, AppProcess)> {
        let mut processes: Vec<(&'static str, AppProcess)> = vec![(
            "event_dispatcher",
            Box::new({
                let worker = self.dispatch_worker;
                move |ctx| Box::pin(async move { worker.run(ctx).await })
            }),
        )];

        if let Some(consumer) = self.command_consumer {
            processes.push((
                "parser_commands",
                Box::new(move |ctx| Box::pin(async move { consumer.run(ctx).await })),
            ));
        }

        if let Some(responder) = self.request_responder {
            processes.push((
                "parser_requests",
                Box::new(move |ctx| Box::pin(async move { responder.run(ctx).await })),
            ));
        }

        processes
    }
}
