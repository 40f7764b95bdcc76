use crate::script::{create_deadline_engine, CompiledScript, ScriptError, ScriptResult, SandboxLimits};
use async_trait::async_trait;
use rhai::{Dynamic, EvalAltResult, Scope};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Runs compiled scripts in isolation.
///
/// The script sees exactly `payload` (a string) and `lastParsedPayload`
/// (the JSON value of the preceding record's output), nothing else.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ScriptSandbox: Send + Sync {
    async fn evaluate(
        &self,
        script: Arc<CompiledScript>,
        payload: &str,
        last_parsed: &JsonValue,
        budget: Duration,
    ) -> ScriptResult<JsonValue>;
}

/// rhai-backed sandbox. Every run gets its own engine on a blocking thread,
/// so a runaway script never stalls the async runtime.
pub struct RhaiSandbox {
    limits: SandboxLimits,
}

impl RhaiSandbox {
    pub fn new(limits: SandboxLimits) -> Self {
        Self { limits }
    }
}

impl Default for RhaiSandbox {
    fn default() -> Self {
        Self::new(SandboxLimits::default())
    }
}

#[async_trait]
impl ScriptSandbox for RhaiSandbox {
    async fn evaluate(
        &self,
        script: Arc<CompiledScript>,
        payload: &str,
        last_parsed: &JsonValue,
        budget: Duration,
    ) -> ScriptResult<JsonValue> {
        let last_parsed = rhai::serde::to_dynamic(last_parsed)
            .map_err(|e| ScriptError::InvalidInput(e.to_string()))?;
        let payload = payload.to_string();
        let limits = self.limits;
        let deadline = Instant::now() + budget;

        let run = tokio::task::spawn_blocking(move || {
            run_script(&script, &limits, deadline, payload, last_parsed, budget)
        });

        match tokio::time::timeout(budget, run).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(ScriptError::Runtime(join_error.to_string())),
            Err(_) => {
                // the blocking thread stops itself at the same deadline
                warn!(budget_ms = budget.as_millis(), "Script run abandoned at deadline");
                Err(ScriptError::Timeout { budget })
            }
        }
    }
}

fn run_script(
    script: &CompiledScript,
    limits: &SandboxLimits,
    deadline: Instant,
    payload: String,
    last_parsed: Dynamic,
    budget: Duration,
) -> ScriptResult<JsonValue> {
    let engine = create_deadline_engine(limits, deadline);

    let mut scope = Scope::new();
    scope.push("payload", payload);
    scope.push_dynamic("lastParsedPayload", last_parsed);

    let output = engine
        .eval_ast_with_scope::<Dynamic>(&mut scope, &script.ast)
        .map_err(|e| {
            if is_terminated(&e) {
                ScriptError::Timeout { budget }
            } else {
                ScriptError::Runtime(e.to_string())
            }
        })?;

    rhai::serde::from_dynamic::<JsonValue>(&output)
        .map_err(|e| ScriptError::InvalidOutput(e.to_string()))
}

// Errors raised inside the wrapped transform function arrive nested.
fn is_terminated(err: &EvalAltResult) -> bool {
    match err {
        EvalAltResult::ErrorTerminated(..) => true,
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => is_terminated(inner),
        _ => false,
    }
}
