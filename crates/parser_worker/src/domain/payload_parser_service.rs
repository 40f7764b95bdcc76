use crate::domain::PayloadEvaluator;
use chrono::{DateTime, Utc};
use common::domain::{
    Caller, DomainError, DomainResult, FindPreviousMessageRepoInput, MessageRepository,
    ParsedPayload, ParserDefinition, MAX_ENCODED_PAYLOAD_LEN,
};
use common::garde::validate_struct;
use garde::Validate;
use std::sync::Arc;
use tracing::{debug, instrument};

/// One payload to transform, positioned in its device's timeline by `created_at`
#[derive(Debug, Clone, Validate)]
pub struct ParsePayloadRequest {
    #[garde(length(min = 1))]
    pub device_id: String,
    #[garde(skip)]
    pub created_at: DateTime<Utc>,
    #[garde(skip)]
    pub parser: ParserDefinition,
    #[garde(skip)]
    pub payload: String,
}

/// Transforms a single raw payload, feeding the script the output of the
/// device's immediately preceding record
pub struct PayloadParserService {
    message_repository: Arc<dyn MessageRepository>,
    evaluator: Arc<dyn PayloadEvaluator>,
}

impl PayloadParserService {
    pub fn new(
        message_repository: Arc<dyn MessageRepository>,
        evaluator: Arc<dyn PayloadEvaluator>,
    ) -> Self {
        Self {
            message_repository,
            evaluator,
        }
    }

    #[instrument(
        skip(self, request, caller),
        fields(device_id = %request.device_id, parser_id = %request.parser.id)
    )]
    pub async fn parse_payload(
        &self,
        request: ParsePayloadRequest,
        caller: &Caller,
    ) -> DomainResult<ParsedPayload> {
        caller.require_authenticated()?;

        // counted in characters, not bytes
        let length = request.payload.chars().count();
        if length > MAX_ENCODED_PAYLOAD_LEN {
            return Err(DomainError::PayloadTooLarge {
                length,
                max: MAX_ENCODED_PAYLOAD_LEN,
            });
        }

        validate_struct(&request)?;

        let last_parsed = self
            .message_repository
            .find_previous_message(FindPreviousMessageRepoInput {
                device_id: request.device_id.clone(),
                before: request.created_at,
            })
            .await?
            .and_then(|previous| previous.data_parsed)
            .unwrap_or_else(ParsedPayload::empty_sequence);

        debug!(
            payload_len = length,
            has_previous = !last_parsed.is_empty(),
            "Evaluating parser script"
        );

        self.evaluator
            .evaluate(&request.parser, &request.payload, &last_parsed)
            .await
    }
}
