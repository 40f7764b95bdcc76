use crate::domain::{
    CreateParserRequest, ListParsersRequest, ParsePayloadRequest, ParserService,
    PayloadParserService, UpdateParserRequest,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use common::domain::{Caller, DomainError, DomainResult, ParserDefinition};
use common::nats::RequestHandler;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{error, instrument, warn};

/// Interactive parser operation received over request/reply
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum ParserRequest {
    CreateParser {
        name: String,
        #[serde(default)]
        description: String,
        function: String,
        #[serde(default)]
        hidden: bool,
    },
    GetParser {
        parser_id: String,
    },
    ListParsers {
        #[serde(default)]
        name_contains: Option<String>,
        #[serde(default)]
        limit: Option<usize>,
        #[serde(default)]
        offset: usize,
    },
    UpdateParser {
        parser_id: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        function: Option<String>,
        #[serde(default)]
        hidden: Option<bool>,
    },
    DeleteParser {
        parser_id: String,
    },
    /// Try an unsaved function against one payload of a device
    ParsePayload {
        device_id: String,
        created_at: DateTime<Utc>,
        function: String,
        payload: String,
    },
}

impl ParserRequest {
    pub fn name(&self) -> &'static str {
        match self {
            ParserRequest::CreateParser { .. } => "create_parser",
            ParserRequest::GetParser { .. } => "get_parser",
            ParserRequest::ListParsers { .. } => "list_parsers",
            ParserRequest::UpdateParser { .. } => "update_parser",
            ParserRequest::DeleteParser { .. } => "delete_parser",
            ParserRequest::ParsePayload { .. } => "parse_payload",
        }
    }
}

/// Request plus the identity the gateway authenticated; a missing caller is anonymous
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ParserRequestEnvelope {
    #[serde(default)]
    pub caller: Caller,
    #[serde(flatten)]
    pub request: ParserRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    PayloadTooLarge,
    ParseFailed,
    InvalidRequest,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ParserReply {
    Ok {
        result: JsonValue,
    },
    Error {
        code: ReplyErrorCode,
        message: String,
    },
}

impl ParserReply {
    /// Store failures are reported without detail
    pub fn from_error(error: &DomainError) -> Self {
        let code = match error {
            DomainError::Unauthorized => ReplyErrorCode::Unauthorized,
            DomainError::Forbidden(_) => ReplyErrorCode::Forbidden,
            DomainError::DeviceNotFound(_) | DomainError::ParserNotFound(_) => {
                ReplyErrorCode::NotFound
            }
            DomainError::PayloadTooLarge { .. } => ReplyErrorCode::PayloadTooLarge,
            DomainError::ParseFailed(_) => ReplyErrorCode::ParseFailed,
            DomainError::ValidationError(_) => ReplyErrorCode::InvalidRequest,
            DomainError::RepositoryError(_) => {
                return ParserReply::Error {
                    code: ReplyErrorCode::Internal,
                    message: "Internal error".to_string(),
                };
            }
        };

        ParserReply::Error {
            code,
            message: error.to_string(),
        }
    }
}

pub fn decode_request(payload: &[u8]) -> Result<ParserRequestEnvelope, serde_json::Error> {
    serde_json::from_slice(payload)
}

/// Unsaved definition for trying a function. The id follows the function
/// text, so repeated tries of the same text reuse one compiled script.
pub fn draft_parser(function: String, owner_id: &str) -> ParserDefinition {
    let mut hasher = DefaultHasher::new();
    function.hash(&mut hasher);

    ParserDefinition {
        id: format!("draft-{:016x}", hasher.finish()),
        user_id: owner_id.to_string(),
        name: "draft".to_string(),
        description: String::new(),
        function,
        hidden: true,
        created_at: DateTime::<Utc>::UNIX_EPOCH,
        updated_at: DateTime::<Utc>::UNIX_EPOCH,
    }
}

/// Routes interactive requests to the parser and payload services
pub struct ParserRequestHandler {
    parsers: Arc<ParserService>,
    payload_parser: Arc<PayloadParserService>,
}

impl ParserRequestHandler {
    pub fn new(parsers: Arc<ParserService>, payload_parser: Arc<PayloadParserService>) -> Self {
        Self {
            parsers,
            payload_parser,
        }
    }

    #[instrument(
        skip(self, envelope),
        fields(request = envelope.request.name(), user_id = %envelope.caller.user_id)
    )]
    pub async fn handle(&self, envelope: ParserRequestEnvelope) -> DomainResult<JsonValue> {
        let caller = &envelope.caller;

        match envelope.request {
            ParserRequest::CreateParser {
                name,
                description,
                function,
                hidden,
            } => to_json(
                self.parsers
                    .create_parser(
                        CreateParserRequest {
                            name,
                            description,
                            function,
                            hidden,
                        },
                        caller,
                    )
                    .await?,
            ),
            ParserRequest::GetParser { parser_id } => {
                to_json(self.parsers.get_parser(&parser_id, caller).await?)
            }
            ParserRequest::ListParsers {
                name_contains,
                limit,
                offset,
            } => to_json(
                self.parsers
                    .list_parsers(
                        ListParsersRequest {
                            name_contains,
                            limit,
                            offset,
                        },
                        caller,
                    )
                    .await?,
            ),
            ParserRequest::UpdateParser {
                parser_id,
                name,
                description,
                function,
                hidden,
            } => to_json(
                self.parsers
                    .update_parser(
                        UpdateParserRequest {
                            id: parser_id,
                            name,
                            description,
                            function,
                            hidden,
                        },
                        caller,
                    )
                    .await?,
            ),
            ParserRequest::DeleteParser { parser_id } => {
                self.parsers.delete_parser(&parser_id, caller).await?;
                Ok(json!({ "id": parser_id }))
            }
            ParserRequest::ParsePayload {
                device_id,
                created_at,
                function,
                payload,
            } => {
                let parsed = self
                    .payload_parser
                    .parse_payload(
                        ParsePayloadRequest {
                            device_id,
                            created_at,
                            parser: draft_parser(function, &caller.user_id),
                            payload,
                        },
                        caller,
                    )
                    .await?;
                Ok(parsed.into_value())
            }
        }
    }

    pub async fn handle_raw(&self, body: &[u8]) -> ParserReply {
        let envelope = match decode_request(body) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Undecodable parser request");
                return ParserReply::Error {
                    code: ReplyErrorCode::InvalidRequest,
                    message: e.to_string(),
                };
            }
        };

        match self.handle(envelope).await {
            Ok(result) => ParserReply::Ok { result },
            Err(e) => {
                if matches!(e, DomainError::RepositoryError(_)) {
                    error!(error = %e, "Parser request failed");
                } else {
                    warn!(error = %e, "Parser request rejected");
                }
                ParserReply::from_error(&e)
            }
        }
    }
}

fn to_json<T: Serialize>(value: T) -> DomainResult<JsonValue> {
    serde_json::to_value(value).map_err(|e| DomainError::RepositoryError(e.into()))
}

const INTERNAL_ERROR_REPLY: &[u8] = br#"{"status":"error","code":"internal","message":"Internal error"}"#;

pub fn encode_reply(reply: &ParserReply) -> Bytes {
    match serde_json::to_vec(reply) {
        Ok(body) => Bytes::from(body),
        Err(e) => {
            error!(error = %e, "Failed to encode parser reply");
            Bytes::from_static(INTERNAL_ERROR_REPLY)
        }
    }
}

/// RequestHandler answering every request with an encoded [`ParserReply`]
pub fn create_parser_request_handler(handler: Arc<ParserRequestHandler>) -> RequestHandler {
    Arc::new(move |body: Bytes| {
        let handler = Arc::clone(&handler);
        async move { encode_reply(&handler.handle_raw(&body).await) }.boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventDispatchWorker, EventDispatcher, MockPayloadEvaluator};
    use common::domain::{
        DomainEvent, EventAction, ParseFailureKind, ParsedPayload, PARSE_FAILED_MESSAGE,
    };
    use common::memory::InMemoryDocumentStore;
    use common::{MockEventPublisher, MockMessageRepository, MockParserRepository};
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        handler: ParserRequestHandler,
        worker: EventDispatchWorker,
        store: Arc<InMemoryDocumentStore>,
    }

    fn fixture(publisher: MockEventPublisher, evaluator: MockPayloadEvaluator) -> Fixture {
        let store = Arc::new(InMemoryDocumentStore::new());
        let (events, worker) = EventDispatcher::channel(16, Arc::new(publisher));
        let parsers = Arc::new(ParserService::new(store.clone(), events));
        let payload_parser = Arc::new(PayloadParserService::new(
            store.clone(),
            Arc::new(evaluator),
        ));

        Fixture {
            handler: ParserRequestHandler::new(parsers, payload_parser),
            worker,
            store,
        }
    }

    async fn flush(worker: EventDispatchWorker) {
        let ctx = CancellationToken::new();
        ctx.cancel();
        worker.run(ctx).await.unwrap();
    }

    fn seeded_parser(owner: &str, hidden: bool) -> ParserDefinition {
        ParserDefinition {
            id: "p-1".to_string(),
            user_id: owner.to_string(),
            name: "counter".to_string(),
            description: String::new(),
            function: "payload".to_string(),
            hidden,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn ok_result(reply: ParserReply) -> JsonValue {
        match reply {
            ParserReply::Ok { result } => result,
            other => panic!("expected ok reply, got {other:?}"),
        }
    }

    fn error_code(reply: &ParserReply) -> Option<ReplyErrorCode> {
        match reply {
            ParserReply::Error { code, .. } => Some(*code),
            ParserReply::Ok { .. } => None,
        }
    }

    #[test]
    fn test_decode_request_with_caller() {
        let envelope = decode_request(
            br#"{"caller":{"user_id":"u-1"},"request":"update_parser","parser_id":"p-1","hidden":true}"#,
        )
        .unwrap();

        assert_eq!(envelope.caller, Caller::user("u-1"));
        assert_eq!(
            envelope.request,
            ParserRequest::UpdateParser {
                parser_id: "p-1".to_string(),
                name: None,
                description: None,
                function: None,
                hidden: Some(true),
            }
        );
    }

    #[test]
    fn test_missing_caller_is_anonymous() {
        let envelope = decode_request(br#"{"request":"list_parsers"}"#).unwrap();
        assert_eq!(envelope.caller, Caller::anonymous());
    }

    #[test]
    fn test_draft_id_follows_function_text() {
        assert_eq!(
            draft_parser("a".to_string(), "u-1").id,
            draft_parser("a".to_string(), "u-2").id
        );
        assert_ne!(
            draft_parser("a".to_string(), "u-1").id,
            draft_parser("b".to_string(), "u-1").id
        );
    }

    #[tokio::test]
    async fn test_create_request_stores_parser_and_publishes_event() {
        // Arrange
        let published = Arc::new(Mutex::new(Vec::<DomainEvent>::new()));
        let mut publisher = MockEventPublisher::new();
        publisher.expect_publish().times(1).returning({
            let published = published.clone();
            move |event| {
                published.lock().unwrap().push(event.clone());
                Ok(())
            }
        });
        let fixture = fixture(publisher, MockPayloadEvaluator::new());

        // Act
        let reply = fixture
            .handler
            .handle_raw(
                br#"{"caller":{"user_id":"u-1"},"request":"create_parser","name":"counter","function":"payload"}"#,
            )
            .await;
        flush(fixture.worker).await;

        // Assert
        let created = ok_result(reply);
        assert_eq!(created["user_id"], "u-1");
        assert_eq!(created["name"], "counter");

        let events = published.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, EventAction::Create);
        assert_eq!(events[0].routing_key.as_deref(), Some("u-1"));
    }

    #[tokio::test]
    async fn test_update_and_delete_requests_publish_events() {
        let published = Arc::new(Mutex::new(Vec::<EventAction>::new()));
        let mut publisher = MockEventPublisher::new();
        publisher.expect_publish().times(2).returning({
            let published = published.clone();
            move |event| {
                published.lock().unwrap().push(event.action);
                Ok(())
            }
        });
        let fixture = fixture(publisher, MockPayloadEvaluator::new());
        fixture.store.insert_parser(seeded_parser("u-1", false)).await;

        let updated = fixture
            .handler
            .handle_raw(
                br#"{"caller":{"user_id":"u-1"},"request":"update_parser","parser_id":"p-1","name":"renamed"}"#,
            )
            .await;
        let deleted = fixture
            .handler
            .handle_raw(br#"{"caller":{"user_id":"u-1"},"request":"delete_parser","parser_id":"p-1"}"#)
            .await;
        flush(fixture.worker).await;

        assert_eq!(ok_result(updated)["name"], "renamed");
        assert_eq!(ok_result(deleted), json!({"id": "p-1"}));
        assert_eq!(
            *published.lock().unwrap(),
            vec![EventAction::Update, EventAction::Delete]
        );
    }

    #[tokio::test]
    async fn test_update_by_non_owner_is_forbidden() {
        let mut publisher = MockEventPublisher::new();
        publisher.expect_publish().times(0);
        let fixture = fixture(publisher, MockPayloadEvaluator::new());
        fixture.store.insert_parser(seeded_parser("u-1", false)).await;

        let reply = fixture
            .handler
            .handle_raw(
                br#"{"caller":{"user_id":"u-2"},"request":"update_parser","parser_id":"p-1","name":"mine"}"#,
            )
            .await;
        flush(fixture.worker).await;

        assert_eq!(error_code(&reply), Some(ReplyErrorCode::Forbidden));
    }

    #[tokio::test]
    async fn test_hidden_parser_of_other_user_is_not_found() {
        let fixture = fixture(MockEventPublisher::new(), MockPayloadEvaluator::new());
        fixture.store.insert_parser(seeded_parser("u-1", true)).await;

        let reply = fixture
            .handler
            .handle_raw(br#"{"caller":{"user_id":"u-2"},"request":"get_parser","parser_id":"p-1"}"#)
            .await;

        assert_eq!(error_code(&reply), Some(ReplyErrorCode::NotFound));
    }

    #[tokio::test]
    async fn test_parse_payload_runs_draft_function() {
        // Arrange
        let mut evaluator = MockPayloadEvaluator::new();
        evaluator
            .expect_evaluate()
            .withf(|parser, payload, last| {
                parser.id.starts_with("draft-")
                    && parser.function == "#{ value: payload.len() }"
                    && payload == "AABBCC"
                    && last.is_empty()
            })
            .times(1)
            .returning(|_, _, _| Ok(ParsedPayload::new(json!({"value": 6}))));
        let fixture = fixture(MockEventPublisher::new(), evaluator);

        // Act
        let reply = fixture
            .handler
            .handle_raw(
                br##"{"caller":{"user_id":"u-1"},"request":"parse_payload","device_id":"d-1","created_at":"2024-01-01T00:00:00Z","function":"#{ value: payload.len() }","payload":"AABBCC"}"##,
            )
            .await;

        // Assert
        assert_eq!(ok_result(reply), json!({"value": 6}));
    }

    #[tokio::test]
    async fn test_parse_payload_failure_keeps_generic_message() {
        let mut evaluator = MockPayloadEvaluator::new();
        evaluator
            .expect_evaluate()
            .returning(|_, _, _| Err(DomainError::ParseFailed(ParseFailureKind::Script)));
        let fixture = fixture(MockEventPublisher::new(), evaluator);

        let reply = fixture
            .handler
            .handle_raw(
                br#"{"caller":{"user_id":"u-1"},"request":"parse_payload","device_id":"d-1","created_at":"2024-01-01T00:00:00Z","function":"throw \"bad\";","payload":"AB"}"#,
            )
            .await;

        assert_eq!(
            reply,
            ParserReply::Error {
                code: ReplyErrorCode::ParseFailed,
                message: PARSE_FAILED_MESSAGE.to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_anonymous_parse_is_unauthorized() {
        let fixture = fixture(MockEventPublisher::new(), MockPayloadEvaluator::new());

        let reply = fixture
            .handler
            .handle_raw(
                br#"{"request":"parse_payload","device_id":"d-1","created_at":"2024-01-01T00:00:00Z","function":"payload","payload":"AB"}"#,
            )
            .await;

        assert_eq!(error_code(&reply), Some(ReplyErrorCode::Unauthorized));
    }

    #[tokio::test]
    async fn test_store_failure_is_reported_without_detail() {
        let mut repo = MockParserRepository::new();
        repo.expect_list_parsers()
            .returning(|_| Err(DomainError::RepositoryError(anyhow::anyhow!("db password wrong"))));
        let (events, _worker) = EventDispatcher::channel(4, Arc::new(MockEventPublisher::new()));
        let handler = ParserRequestHandler::new(
            Arc::new(ParserService::new(Arc::new(repo), events)),
            Arc::new(PayloadParserService::new(
                Arc::new(MockMessageRepository::new()),
                Arc::new(MockPayloadEvaluator::new()),
            )),
        );

        let reply = handler
            .handle_raw(br#"{"caller":{"user_id":"u-1"},"request":"list_parsers"}"#)
            .await;

        assert_eq!(
            reply,
            ParserReply::Error {
                code: ReplyErrorCode::Internal,
                message: "Internal error".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_request_handler_encodes_reply() {
        let fixture = fixture(MockEventPublisher::new(), MockPayloadEvaluator::new());
        let request_handler = create_parser_request_handler(Arc::new(fixture.handler));

        let reply = request_handler(Bytes::from_static(b"not json")).await;
        let decoded: JsonValue = serde_json::from_slice(&reply).unwrap();

        assert_eq!(decoded["status"], "error");
        assert_eq!(decoded["code"], "invalid_request");
    }
}
