//! Segment payloads and the controller/coordinator message contract

mod format;
mod messages;

pub use format::*;
pub use messages::*;
