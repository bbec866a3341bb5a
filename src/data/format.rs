//! Segment payload format
//!
//! Encoded video travels from the capture controller to the coordinator as a
//! base64 data URL, the representation the page-to-background relay used.
//! The coordinator decodes it back to the binary container before saving.

use std::path::PathBuf;

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Container MIME type for every produced segment.
pub const WEBM_MIME: &str = "video/webm";

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload is not a base64 data URL")]
    NotADataUrl,
    #[error("payload base64 is malformed: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// One encoded segment, carried as `data:{mime};base64,{bytes}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentPayload(String);

impl SegmentPayload {
    /// Encodes a finished buffer for relay. Consumes the buffer: after the
    /// hand-off the producer has nothing left to reuse.
    pub fn encode(bytes: Vec<u8>, mime: &str) -> Self {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        Self(format!("data:{mime};base64,{encoded}"))
    }

    /// Recovers the binary container for saving.
    pub fn decode(&self) -> Result<Vec<u8>, PayloadError> {
        let rest = self
            .0
            .strip_prefix("data:")
            .ok_or(PayloadError::NotADataUrl)?;
        let (_mime, data) = rest
            .split_once(";base64,")
            .ok_or(PayloadError::NotADataUrl)?;
        Ok(base64::engine::general_purpose::STANDARD.decode(data)?)
    }

    /// Length of the encoded form, for logging.
    pub fn encoded_len(&self) -> usize {
        self.0.len()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Record of one segment written to disk.
#[derive(Debug, Clone, Serialize)]
pub struct SavedSegment {
    pub path: PathBuf,
    pub bytes: u64,
    pub saved_at: DateTime<Utc>,
}
