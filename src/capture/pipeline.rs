//! Encoder pipeline seam
//!
//! A pipeline turns grabbed frames into encoded WebM buffers. The controller
//! treats it as opaque: start it with a spec, receive data events, request a
//! stop, and wait for the terminal flush.

use std::time::Duration;

use tokio::sync::{mpsc, watch};

use super::{CaptureError, CaptureSurface};
use crate::vision::Rect;

/// Everything a pipeline needs for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSpec {
    /// Region of each grabbed frame to keep, applied before scaling.
    pub crop: Option<Rect>,
    /// Final encoded dimensions, already even.
    pub output_width: u32,
    pub output_height: u32,
    pub fps: u32,
    /// Emit a data event per elapsed timeslice. `None` buffers the whole
    /// session into a single terminal event.
    pub timeslice: Option<Duration>,
    pub bitrate_kbps: u32,
}

/// Pipeline output. A `Data` buffer is moved out to the receiver; the
/// pipeline keeps no copy once the event is sent.
#[derive(Debug, PartialEq, Eq)]
pub enum PipelineEvent {
    Data(Vec<u8>),
    /// Sent exactly once, after the terminal flush.
    Finished,
}

/// Handle to a running pipeline: its event stream plus an advisory stop
/// signal. Dropping the handle abandons the session.
pub struct PipelineHandle {
    events: mpsc::Receiver<PipelineEvent>,
    stop: watch::Sender<bool>,
}

impl PipelineHandle {
    pub fn new(events: mpsc::Receiver<PipelineEvent>, stop: watch::Sender<bool>) -> Self {
        Self { events, stop }
    }

    pub async fn next_event(&mut self) -> Option<PipelineEvent> {
        self.events.recv().await
    }

    /// Asks the pipeline to finalize. Advisory: the pipeline drains on its
    /// own time and answers with a final `Data` flush and then `Finished`.
    pub fn request_stop(&self) {
        let _ = self.stop.send(true);
    }
}

pub trait EncoderPipeline: Send + Sync {
    fn start(
        &self,
        surface: Box<dyn CaptureSurface>,
        spec: PipelineSpec,
    ) -> Result<PipelineHandle, CaptureError>;
}

/// Output dimensions for a source, capped so its larger axis does not exceed
/// `max_dimension` (0 disables the cap). Both results are rounded up to even,
/// which the encoder requires.
pub fn scaled_dimensions(source_width: u32, source_height: u32, max_dimension: u32) -> (u32, u32) {
    let larger = source_width.max(source_height);
    if max_dimension == 0 || larger <= max_dimension {
        return (make_even(source_width), make_even(source_height));
    }

    let scale = max_dimension as f64 / larger as f64;
    let width = (source_width as f64 * scale).round() as u32;
    let height = (source_height as f64 * scale).round() as u32;
    (make_even(width), make_even(height))
}

fn make_even(v: u32) -> u32 {
    if v % 2 == 0 {
        v
    } else {
        v + 1
    }
}
