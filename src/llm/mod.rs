mod format_validator;
mod message;
pub mod providers;
mod service;

pub use format_validator::*;
pub use message::*;
pub use service::*;
