use std::time::Duration;
use thiserror::Error;

pub type ScriptResult<T> = Result<T, ScriptError>;

/// Failure of a single script compilation or run.
///
/// Messages may contain script text and are for logs only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("compilation failed: {0}")]
    Compilation(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("exceeded time budget of {budget:?}")]
    Timeout { budget: Duration },

    #[error("input could not be converted: {0}")]
    InvalidInput(String),

    #[error("output could not be converted: {0}")]
    InvalidOutput(String),
}

impl ScriptError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ScriptError::Timeout { .. })
    }
}
