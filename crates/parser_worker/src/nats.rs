mod parser_command_processor;
mod parser_event_producer;
mod parser_request_handler;

pub use parser_command_processor::*;
pub use parser_event_producer::*;
pub use parser_request_handler::*;
