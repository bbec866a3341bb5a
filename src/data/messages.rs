//! Message contract between the coordinator and the capture controller
//!
//! The serde shapes reproduce the original relay's JSON keys:
//! `{"command": "startRecording"}` downstream, `{"videoChunk": …}` and
//! `{"videoData": …}` upstream, plus session lifecycle envelopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::data::format::SegmentPayload;
use crate::naming::PageAddress;

/// Command relayed from the coordinator to the capture controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ControlCommand {
    StartRecording,
    StopRecording,
}

/// Downstream wire shape: `{"command": "startRecording"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub command: ControlCommand,
}

/// Announces a freshly started session to the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionAnnounce {
    pub session_id: Uuid,
    pub page: PageAddress,
    pub started_at: DateTime<Utc>,
}

/// One relayed segment. The payload was moved in at encode time; the
/// capture side holds no copy once the envelope is sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentEnvelope {
    pub session_id: Uuid,
    pub payload: SegmentPayload,
}

/// Marks the end of a session, after its terminal segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClose {
    pub session_id: Uuid,
    pub stopped_at: DateTime<Utc>,
}

/// Upstream messages from the capture controller.
///
/// Externally tagged so each serializes as a single-key object with the
/// original contract's key names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CaptureMessage {
    RecordingStarted(SessionAnnounce),
    VideoChunk(SegmentEnvelope),
    VideoData(SegmentEnvelope),
    RecordingStopped(SessionClose),
}
