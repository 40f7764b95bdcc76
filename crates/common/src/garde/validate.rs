//! Request validation on top of garde.

use crate::domain::{DomainError, DomainResult};
use garde::{Report, Validate};

/// Validate a request, folding every garde violation into one `ValidationError`
pub fn validate_struct<T>(request: &T) -> DomainResult<()>
where
    T: Validate,
    T::Context: Default,
{
    request
        .validate()
        .map_err(|report| DomainError::ValidationError(describe(&report)))
}

/// Custom rule for parser names and script bodies: whitespace alone would
/// pass a length check but names nothing and compiles to a no-op.
pub fn non_blank(value: &str, _context: &()) -> garde::Result {
    if value.trim().is_empty() {
        return Err(garde::Error::new("must not be blank"));
    }
    Ok(())
}

/// "path: message" pairs joined by commas; root-level errors have no path prefix
fn describe(report: &Report) -> String {
    report
        .iter()
        .map(|(path, error)| {
            let path = path.to_string();
            if path.is_empty() {
                error.message().to_string()
            } else {
                format!("{}: {}", path, error.message())
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}
