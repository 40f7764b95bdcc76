mod client;
mod consumer;
mod responder;
mod traits;

pub use client::*;
pub use consumer::*;
pub use responder::*;
pub use traits::*;
