use crate::domain::{
    BatchOutcome, BatchReport, DeviceReport, ParsePayloadRequest, PayloadParserService,
    RecordReport, RecordStatus,
};
use common::domain::{
    Caller, Device, DeviceRepository, DomainError, DomainResult, GeolocationExtractor,
    GetDeviceWithParserRepoInput, ListDeviceMessagesRepoInput, ListParserDevicesRepoInput,
    ListParsersRepoInput, Message, MessageRepository, ParserDefinition, ParserFilter,
    ParserRepository, UpsertMessageRepoInput,
};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy)]
pub struct BatchReparseConfig {
    /// Devices reparsed at the same time by a parser-wide batch
    pub device_concurrency: usize,
    /// Most recently updated devices considered by a parser-wide batch
    pub parser_devices_limit: usize,
}

impl Default for BatchReparseConfig {
    fn default() -> Self {
        Self {
            device_concurrency: 4,
            parser_devices_limit: 100,
        }
    }
}

/// Re-derives stored parsed output for whole devices.
///
/// Records of a device are parsed strictly in `created_at` order, each one
/// persisted before the next starts, so every script sees its predecessor's
/// fresh output.
pub struct BatchReparseService {
    device_repository: Arc<dyn DeviceRepository>,
    parser_repository: Arc<dyn ParserRepository>,
    message_repository: Arc<dyn MessageRepository>,
    payload_parser: Arc<PayloadParserService>,
    geolocation_extractor: Arc<dyn GeolocationExtractor>,
    config: BatchReparseConfig,
}

impl BatchReparseService {
    pub fn new(
        device_repository: Arc<dyn DeviceRepository>,
        parser_repository: Arc<dyn ParserRepository>,
        message_repository: Arc<dyn MessageRepository>,
        payload_parser: Arc<PayloadParserService>,
        geolocation_extractor: Arc<dyn GeolocationExtractor>,
        config: BatchReparseConfig,
    ) -> Self {
        Self {
            device_repository,
            parser_repository,
            message_repository,
            payload_parser,
            geolocation_extractor,
            config,
        }
    }

    #[instrument(skip(self, caller, cancel), fields(user_id = %caller.user_id))]
    pub async fn parse_all_messages_for_device(
        &self,
        device_id: &str,
        caller: &Caller,
        cancel: &CancellationToken,
    ) -> DomainResult<BatchReport> {
        let user_id = caller.require_authenticated()?;

        let found = self
            .device_repository
            .get_device_with_parser(GetDeviceWithParserRepoInput {
                device_id: device_id.to_string(),
            })
            .await?
            .ok_or_else(|| DomainError::DeviceNotFound(device_id.to_string()))?;

        if found.device.user_id != user_id {
            warn!(owner_id = %found.device.user_id, "Caller does not own device");
            return Err(DomainError::Forbidden(format!(
                "device {} belongs to another user",
                device_id
            )));
        }

        let report = self
            .reparse_device(&found.device, found.parser.as_ref(), caller, cancel)
            .await?;

        info!(
            outcome = ?report.outcome,
            records = report.records.len(),
            "Device reparse finished"
        );

        Ok(BatchReport {
            outcome: report.outcome,
            devices: vec![report],
        })
    }

    #[instrument(skip(self, caller, cancel), fields(user_id = %caller.user_id))]
    pub async fn parse_all_messages_for_parser(
        &self,
        parser_id: &str,
        caller: &Caller,
        cancel: &CancellationToken,
    ) -> DomainResult<BatchReport> {
        let user_id = caller.require_authenticated()?;

        let visible = self
            .parser_repository
            .list_parsers(ListParsersRepoInput {
                filter: ParserFilter::scoped_for(
                    caller,
                    Some(ParserFilter::IdEquals(parser_id.to_string())),
                ),
                limit: Some(1),
                offset: 0,
            })
            .await?;
        if visible.is_empty() {
            return Err(DomainError::ParserNotFound(parser_id.to_string()));
        }

        let devices = self
            .device_repository
            .list_parser_devices(ListParserDevicesRepoInput {
                parser_id: parser_id.to_string(),
                user_id: user_id.to_string(),
                limit: self.config.parser_devices_limit,
            })
            .await?;

        if devices.is_empty() {
            return Ok(BatchReport::without_devices(BatchOutcome::NoDevicesAssociated));
        }

        debug!(device_count = devices.len(), "Reparsing devices of parser");

        // join barrier: the report exists only once every device is done
        let reports: Vec<DeviceReport> = stream::iter(devices)
            .map(|device| self.reparse_associated_device(device, caller, cancel))
            .buffered(self.config.device_concurrency.max(1))
            .collect()
            .await;

        let outcome = if cancel.is_cancelled() {
            BatchOutcome::Cancelled
        } else {
            BatchOutcome::Success
        };

        info!(
            outcome = ?outcome,
            devices = reports.len(),
            "Parser reparse finished"
        );

        Ok(BatchReport {
            outcome,
            devices: reports,
        })
    }

    /// Reloads the device so a concurrent reassignment is honored. Store
    /// failures stay local to this device.
    async fn reparse_associated_device(
        &self,
        device: Device,
        caller: &Caller,
        cancel: &CancellationToken,
    ) -> DeviceReport {
        if cancel.is_cancelled() {
            return DeviceReport::empty(device.id, BatchOutcome::Cancelled);
        }

        let reloaded = match self
            .device_repository
            .get_device_with_parser(GetDeviceWithParserRepoInput {
                device_id: device.id.clone(),
            })
            .await
        {
            Ok(Some(found)) => found,
            Ok(None) => return DeviceReport::empty(device.id, BatchOutcome::DeviceNotFound),
            Err(e) => {
                error!(device_id = %device.id, error = %e, "Failed to reload device");
                return DeviceReport::empty(device.id, BatchOutcome::Failed);
            }
        };

        match self
            .reparse_device(&reloaded.device, reloaded.parser.as_ref(), caller, cancel)
            .await
        {
            Ok(report) => report,
            Err(e) => {
                error!(device_id = %device.id, error = %e, "Failed to reparse device");
                DeviceReport::empty(device.id, BatchOutcome::Failed)
            }
        }
    }

    async fn reparse_device(
        &self,
        device: &Device,
        parser: Option<&ParserDefinition>,
        caller: &Caller,
        cancel: &CancellationToken,
    ) -> DomainResult<DeviceReport> {
        let Some(parser) = parser else {
            return Ok(DeviceReport::empty(&device.id, BatchOutcome::NoParserAssociated));
        };

        let messages = self
            .message_repository
            .list_device_messages(ListDeviceMessagesRepoInput {
                device_id: device.id.clone(),
            })
            .await?;

        if messages.is_empty() {
            return Ok(DeviceReport::empty(&device.id, BatchOutcome::NoMessages));
        }

        let mut report = DeviceReport::empty(&device.id, BatchOutcome::Success);
        for message in messages {
            if cancel.is_cancelled() {
                debug!(device_id = %device.id, "Reparse cancelled");
                report.outcome = BatchOutcome::Cancelled;
                break;
            }

            let message_id = message.id.clone();
            let status = self.reparse_message(message, parser, caller).await;
            report.records.push(RecordReport { message_id, status });
        }

        Ok(report)
    }

    async fn reparse_message(
        &self,
        mut message: Message,
        parser: &ParserDefinition,
        caller: &Caller,
    ) -> RecordStatus {
        let Some(payload) = message.raw_payload().map(str::to_string) else {
            return RecordStatus::Skipped;
        };

        let parsed = match self
            .payload_parser
            .parse_payload(
                ParsePayloadRequest {
                    device_id: message.device_id.clone(),
                    created_at: message.created_at,
                    parser: parser.clone(),
                    payload,
                },
                caller,
            )
            .await
        {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "Record not reparsed");
                return RecordStatus::Failed(e.to_string());
            }
        };

        if parsed.is_null() {
            return RecordStatus::Skipped;
        }

        message.data_parsed = Some(parsed);
        let stored = match self
            .message_repository
            .upsert_message(UpsertMessageRepoInput { message })
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                error!(error = %e, "Failed to store reparsed record");
                return RecordStatus::Failed(e.to_string());
            }
        };

        if stored.data_parsed.as_ref().is_some_and(|p| !p.is_empty()) {
            if let Err(e) = self
                .geolocation_extractor
                .create_from_parsed_message(&stored)
                .await
            {
                warn!(message_id = %stored.id, error = %e, "Geolocation extraction failed");
            }
        }

        RecordStatus::Parsed
    }
}
