use crate::domain::{BatchReparseService, BatchReport};
use async_nats::jetstream::Message;
use common::domain::{Caller, DomainError, DomainResult};
use common::nats::{BatchProcessor, ProcessingResult};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Batch reparse request received from the bus
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ParserCommand {
    /// Reparse every record of one device
    ParseMessages { device_id: String, user_id: String },
    /// Reparse every device associated to a parser
    ParseDevices { parser_id: String, user_id: String },
}

impl ParserCommand {
    pub fn caller(&self) -> Caller {
        match self {
            ParserCommand::ParseMessages { user_id, .. }
            | ParserCommand::ParseDevices { user_id, .. } => Caller::user(user_id.clone()),
        }
    }
}

pub fn decode_command(payload: &[u8]) -> Result<ParserCommand, serde_json::Error> {
    serde_json::from_slice(payload)
}

pub async fn handle_command(
    service: &BatchReparseService,
    command: &ParserCommand,
    cancel: &CancellationToken,
) -> DomainResult<BatchReport> {
    let caller = command.caller();
    match command {
        ParserCommand::ParseMessages { device_id, .. } => {
            service
                .parse_all_messages_for_device(device_id, &caller, cancel)
                .await
        }
        ParserCommand::ParseDevices { parser_id, .. } => {
            service
                .parse_all_messages_for_parser(parser_id, &caller, cancel)
                .await
        }
    }
}

/// Only store failures are worth redelivering; anything else would fail the same way again
pub fn should_redeliver(error: &DomainError) -> bool {
    matches!(error, DomainError::RepositoryError(_))
}

/// BatchProcessor running reparse commands one after another
pub fn create_parser_command_processor(
    service: Arc<BatchReparseService>,
    cancel: CancellationToken,
) -> BatchProcessor {
    Box::new(move |messages: &[Message]| {
        let service = Arc::clone(&service);
        let cancel = cancel.clone();

        let message_data: Vec<(usize, Vec<u8>, String)> = messages
            .iter()
            .enumerate()
            .map(|(idx, msg)| (idx, msg.payload.to_vec(), msg.subject.to_string()))
            .collect();

        Box::pin(async move {
            let mut ack = Vec::new();
            let mut nak = Vec::new();

            for (idx, payload, subject) in message_data {
                let command = match decode_command(&payload) {
                    Ok(command) => command,
                    Err(e) => {
                        error!(error = %e, subject = %subject, "Dropping undecodable parser command");
                        ack.push(idx);
                        continue;
                    }
                };

                match handle_command(&service, &command, &cancel).await {
                    Ok(report) => {
                        info!(
                            subject = %subject,
                            outcome = report.message(),
                            parsed = report.parsed_count(),
                            failed = report.failed_count(),
                            "Parser command done"
                        );
                        ack.push(idx);
                    }
                    Err(e) if should_redeliver(&e) => {
                        error!(error = %e, subject = %subject, "Parser command failed, will retry");
                        nak.push((idx, Some(e.to_string())));
                    }
                    Err(e) => {
                        warn!(error = %e, subject = %subject, "Parser command rejected");
                        ack.push(idx);
                    }
                }
            }

            Ok(ProcessingResult::new(ack, nak))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::ParseFailureKind;

    #[test]
    fn test_decode_commands() {
        let device = decode_command(
            br#"{"command":"parse_messages","device_id":"d-1","user_id":"u-1"}"#,
        )
        .unwrap();
        let parser = decode_command(
            br#"{"command":"parse_devices","parser_id":"p-1","user_id":"u-1"}"#,
        )
        .unwrap();

        assert_eq!(
            device,
            ParserCommand::ParseMessages {
                device_id: "d-1".to_string(),
                user_id: "u-1".to_string()
            }
        );
        assert_eq!(parser.caller(), Caller::user("u-1"));
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        assert!(decode_command(br#"{"command":"format_disk"}"#).is_err());
        assert!(decode_command(b"not json").is_err());
    }

    #[test]
    fn test_only_store_failures_are_redelivered() {
        assert!(should_redeliver(&DomainError::RepositoryError(anyhow::anyhow!(
            "timeout"
        ))));
        assert!(!should_redeliver(&DomainError::Unauthorized));
        assert!(!should_redeliver(&DomainError::Forbidden("d-1".to_string())));
        assert!(!should_redeliver(&DomainError::ParseFailed(
            ParseFailureKind::Timeout
        )));
    }
}
