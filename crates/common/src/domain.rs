mod caller;
mod device;
mod event;
mod geolocation;
mod message;
mod parsed_payload;
mod parser;
mod result;

pub use caller::*;
pub use device::*;
pub use event::*;
pub use geolocation::*;
pub use message::*;
pub use parsed_payload::*;
pub use parser::*;
pub use result::*;
