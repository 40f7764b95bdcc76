use async_trait::async_trait;
use common::domain::{
    DomainError, DomainResult, ParseFailureKind, ParsedPayload, ParserDefinition,
};
use common::script::{ScriptCache, ScriptError, ScriptSandbox};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

/// Runs a parser's script against one raw payload
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PayloadEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        parser: &ParserDefinition,
        payload: &str,
        last_parsed: &ParsedPayload,
    ) -> DomainResult<ParsedPayload>;
}

/// Compiles through the shared cache and runs in the sandbox under a fixed budget.
///
/// Every script fault becomes `DomainError::ParseFailed`; the detail is logged here
/// and goes no further.
pub struct SandboxedPayloadEvaluator {
    cache: Arc<ScriptCache>,
    sandbox: Arc<dyn ScriptSandbox>,
    budget: Duration,
}

impl SandboxedPayloadEvaluator {
    pub fn new(cache: Arc<ScriptCache>, sandbox: Arc<dyn ScriptSandbox>, budget: Duration) -> Self {
        Self {
            cache,
            sandbox,
            budget,
        }
    }

    fn script_failure(parser: &ParserDefinition, e: ScriptError) -> DomainError {
        if e.is_timeout() {
            warn!(parser_id = %parser.id, error = %e, "Parser script timed out");
            DomainError::ParseFailed(ParseFailureKind::Timeout)
        } else {
            error!(parser_id = %parser.id, error = %e, "Parser script failed");
            DomainError::ParseFailed(ParseFailureKind::Script)
        }
    }
}

#[async_trait]
impl PayloadEvaluator for SandboxedPayloadEvaluator {
    async fn evaluate(
        &self,
        parser: &ParserDefinition,
        payload: &str,
        last_parsed: &ParsedPayload,
    ) -> DomainResult<ParsedPayload> {
        let compiled = self
            .cache
            .get_compiled(parser)
            .map_err(|e| Self::script_failure(parser, e))?;

        self.sandbox
            .evaluate(compiled, payload, last_parsed.as_value(), self.budget)
            .await
            .map(ParsedPayload::from)
            .map_err(|e| Self::script_failure(parser, e))
    }
}
