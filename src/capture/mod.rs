//! Canvas capture module
//!
//! Owns the recording lifecycle: locating the capture surface, one-shot
//! crop detection, driving the encode pipeline at a fixed frame rate, and
//! relaying finished segments to the coordinator.

mod controller;
mod ffmpeg;
mod pipeline;
mod surface;

pub use controller::{CaptureController, CaptureSettings, DeliveryMode};
pub use ffmpeg::FfmpegPipeline;
pub use pipeline::{
    scaled_dimensions, EncoderPipeline, PipelineEvent, PipelineHandle, PipelineSpec,
};
pub use surface::{CaptureSurface, PatternSpec, PatternSurface, StaticLocator, SurfaceLocator};

use thiserror::Error;

use crate::vision::NoContentRegion;

/// Failures of the capture side. All of them are absorbed at the
/// controller's run loop with a log line; none reach the UI.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture surface not found")]
    SurfaceNotFound,
    #[error("recording already in progress")]
    AlreadyRecording,
    #[error("no recording in progress")]
    NotRecording,
    #[error(transparent)]
    NoRegionFound(#[from] NoContentRegion),
    #[error("encoder pipeline failed: {0}")]
    Pipeline(String),
}
