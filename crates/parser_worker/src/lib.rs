pub mod domain;
pub mod nats;
pub mod parser_worker;

pub use domain::*;
pub use nats::*;
pub use parser_worker::*;
