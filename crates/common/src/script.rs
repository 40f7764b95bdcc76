//! Sandboxed execution of user-authored transformation scripts.
//!
//! Scripts are rhai source bodies. Each body is wrapped into
//! `fn transform(payload, lastParsedPayload)` and compiled once per
//! parser revision; see [`ScriptCache`].

mod cache;
mod engine;
mod error;
mod sandbox;

pub use cache::*;
pub use engine::*;
pub use error::*;
pub use sandbox::*;
