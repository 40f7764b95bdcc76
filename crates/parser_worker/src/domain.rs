mod batch_reparse_service;
mod batch_report;
mod event_dispatcher;
mod geolocation_extractor;
mod parser_service;
mod payload_evaluator;
mod payload_parser_service;

pub use batch_reparse_service::*;
pub use batch_report::*;
pub use event_dispatcher::*;
pub use geolocation_extractor::*;
pub use parser_service::*;
pub use payload_evaluator::*;
pub use payload_parser_service::*;
