mod config;

use common::memory::InMemoryDocumentStore;
use common::nats::NatsClient;
use common::script::SandboxLimits;
use common::telemetry::{init_telemetry, TelemetryConfig};
use config::ServiceConfig;
use parser_runner::Runner;
use parser_worker::domain::BatchReparseConfig;
use parser_worker::nats::ParserEventProducer;
use parser_worker::parser_worker::{
    ParserCommandsConfig, ParserRepositories, ParserRequestsConfig, ParserWorker,
    ParserWorkerConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_telemetry(&TelemetryConfig {
        service_name: config.service_name.clone(),
        log_level: config.log_level.clone(),
    }) {
        eprintln!("Failed to initialize telemetry: {}", e);
        std::process::exit(1);
    }

    info!(service = %config.service_name, "Starting parser service");
    debug!("Configuration: {:?}", config);

    let shutdown = CancellationToken::new();

    let worker = match build_worker(&config, shutdown.child_token()).await {
        Ok(worker) => worker,
        Err(e) => {
            error!(error = format!("{e:#}"), "Failed to initialize parser worker");
            std::process::exit(1);
        }
    };

    let mut runner = Runner::new().with_cancellation_token(shutdown);
    for (name, process) in worker.into_runner_processes() {
        runner = runner.with_named_process(name, process);
    }
    if let Err(e) = runner.run().await {
        error!(error = format!("{e:#}"), "Parser service exiting with error");
        std::process::exit(1);
    }
}

async fn build_worker(
    config: &ServiceConfig,
    batch_cancel: CancellationToken,
) -> anyhow::Result<ParserWorker> {
    let store = Arc::new(match &config.store_snapshot_path {
        Some(path) => InMemoryDocumentStore::load_snapshot_file(path)?,
        None => InMemoryDocumentStore::new(),
    });
    let repositories = ParserRepositories {
        parsers: store.clone(),
        devices: store.clone(),
        messages: store.clone(),
        geolocations: store,
    };

    info!("Initializing NATS...");
    let nats_client = NatsClient::connect(
        &config.nats_url,
        Duration::from_secs(config.startup_timeout_secs),
    )
    .await?;
    nats_client
        .ensure_stream(&config.events_stream, "Parser definition events")
        .await?;
    nats_client
        .ensure_stream(&config.commands_stream, "Batch reparse commands")
        .await?;

    let event_producer = Arc::new(ParserEventProducer::new(
        nats_client.create_publisher_client(),
        config.events_stream.clone(),
    ));

    let worker = ParserWorker::new(
        repositories,
        event_producer,
        ParserWorkerConfig {
            script_budget: Duration::from_millis(config.script_timeout_ms),
            script_cache_capacity: config.script_cache_capacity,
            sandbox_limits: SandboxLimits {
                max_operations: config.script_max_operations,
                ..SandboxLimits::default()
            },
            batch: BatchReparseConfig {
                device_concurrency: config.device_concurrency,
                parser_devices_limit: config.parser_devices_limit,
            },
            event_queue_capacity: config.event_queue_capacity,
        },
        batch_cancel,
    );

    worker
        .with_command_consumer(
            &nats_client,
            ParserCommandsConfig {
                stream: config.commands_stream.clone(),
                subject: config.commands_subject.clone(),
                consumer_name: config.commands_consumer_name.clone(),
                batch_size: config.nats_batch_size,
                batch_wait: Duration::from_secs(config.nats_batch_wait_secs),
            },
        )
        .await?
        .with_request_responder(
            &nats_client,
            ParserRequestsConfig {
                subject: config.requests_subject.clone(),
                queue_group: config.requests_queue_group.clone(),
                max_in_flight: config.requests_max_in_flight,
            },
        )
        .await
}
