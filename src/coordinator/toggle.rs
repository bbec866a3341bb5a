//! The recording toggle
//!
//! One boolean with a single writer path. Flipping it is the whole user
//! interface: each flip yields the command to relay downstream, so the
//! transition and the command can never disagree.

use crate::data::ControlCommand;

use super::EngineStatus;

#[derive(Debug, Default)]
pub struct RecordingToggle {
    recording: bool,
}

impl RecordingToggle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flips the flag and returns the command the new state calls for.
    pub fn toggle(&mut self) -> ControlCommand {
        self.recording = !self.recording;
        if self.recording {
            ControlCommand::StartRecording
        } else {
            ControlCommand::StopRecording
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn status(&self) -> EngineStatus {
        if self.recording {
            EngineStatus::Recording
        } else {
            EngineStatus::Idle
        }
    }
}
