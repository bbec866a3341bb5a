//! Recording indicator UI

mod indicator;

pub use indicator::RecordingIndicator;
