use std::fmt;
use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Message surfaced to callers when a transformation script fails for any reason.
/// The underlying cause is only ever logged.
pub const PARSE_FAILED_MESSAGE: &str = "Parser | Error parsing data";

/// Why a parse failed, kept for internal classification only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseFailureKind {
    /// The script did not compile, raised, or produced unusable output
    Script,
    /// The script exceeded its wall-clock budget
    Timeout,
}

impl fmt::Display for ParseFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseFailureKind::Script => f.write_str("script"),
            ParseFailureKind::Timeout => f.write_str("timeout"),
        }
    }
}

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Please login or use a valid access token.")]
    Unauthorized,

    #[error("Permission denied: {0}")]
    Forbidden(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Parser not found: {0}")]
    ParserNotFound(String),

    #[error("Sigfox payload cannot be more than 12 bytes (got {length} characters, max {max})")]
    PayloadTooLarge { length: usize, max: usize },

    // Same text for every kind: callers never learn the cause.
    #[error("Parser | Error parsing data")]
    ParseFailed(ParseFailureKind),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Repository error: {0}")]
    RepositoryError(#[from] anyhow::Error),
}
