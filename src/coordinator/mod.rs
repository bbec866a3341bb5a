//! Coordinator - relays the recording toggle and sinks finished segments

mod engine;
mod toggle;

pub use engine::{create_engine_channels, CoordinatorEngine, CounterScope};
pub use toggle::RecordingToggle;

/// Commands that can be sent to the coordinator engine
#[derive(Debug, Clone)]
pub enum EngineCommand {
    /// A user trigger flipped the recording toggle
    Toggle,
    /// Shutdown the engine
    Shutdown,
}

/// Status updates from the coordinator engine.
///
/// Exactly two values: the icon is a pure function of the toggle flag, and
/// a failed or degraded session never shows up here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// Not recording
    Idle,
    /// Recording toggle is on
    Recording,
}
