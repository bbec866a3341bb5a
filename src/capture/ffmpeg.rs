//! ffmpeg-backed encoder pipeline
//!
//! Spawns an ffmpeg child, feeds it raw RGBA frames over stdin at the
//! capture rate, and reads the muxed WebM stream back from stdout. In
//! chunked mode the stream is sliced into timed data events; whole-capture
//! mode buffers everything into the single terminal flush.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use image::imageops::{self, FilterType};
use image::RgbaImage;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, warn};

use super::pipeline::{EncoderPipeline, PipelineEvent, PipelineHandle, PipelineSpec};
use super::surface::CaptureSurface;
use super::CaptureError;

const READ_BUF_SIZE: usize = 64 * 1024;
const EVENT_CHANNEL_SIZE: usize = 16;

pub struct FfmpegPipeline {
    binary: PathBuf,
}

impl FfmpegPipeline {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
        }
    }

    pub fn with_binary(binary: PathBuf) -> Self {
        Self { binary }
    }
}

impl Default for FfmpegPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl EncoderPipeline for FfmpegPipeline {
    fn start(
        &self,
        surface: Box<dyn CaptureSurface>,
        spec: PipelineSpec,
    ) -> Result<PipelineHandle, CaptureError> {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (stop_tx, stop_rx) = watch::channel(false);

        let mut child = Command::new(&self.binary)
            .args(encoder_args(&spec))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CaptureError::Pipeline(format!("spawning {} failed: {e}", self.binary.display()))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CaptureError::Pipeline("encoder stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::Pipeline("encoder stdout unavailable".to_string()))?;

        debug!(
            output_width = spec.output_width,
            output_height = spec.output_height,
            fps = spec.fps,
            "encoder pipeline started"
        );

        let timeslice = spec.timeslice;
        tokio::spawn(pump_frames(surface, spec, stdin, stop_rx));
        tokio::spawn(collect_output(child, stdout, timeslice, event_tx));

        Ok(PipelineHandle::new(event_rx, stop_tx))
    }
}

/// Command line for one session: raw RGBA frames in, muxed WebM on stdout.
/// vp8 with a fixed target bitrate, matching the relay's recorder settings.
fn encoder_args(spec: &PipelineSpec) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "rgba".to_string(),
        "-s".to_string(),
        format!("{}x{}", spec.output_width, spec.output_height),
        "-r".to_string(),
        spec.fps.to_string(),
        "-i".to_string(),
        "-".to_string(),
        "-c:v".to_string(),
        "libvpx".to_string(),
        "-b:v".to_string(),
        format!("{}k", spec.bitrate_kbps),
        "-f".to_string(),
        "webm".to_string(),
        "pipe:1".to_string(),
    ]
}

/// Crop and scale one grabbed frame down to the encoded size.
fn render_output(frame: RgbaImage, spec: &PipelineSpec) -> RgbaImage {
    let cropped = match spec.crop {
        Some(region) => {
            imageops::crop_imm(&frame, region.x, region.y, region.width, region.height).to_image()
        }
        None => frame,
    };
    if cropped.dimensions() == (spec.output_width, spec.output_height) {
        cropped
    } else {
        imageops::resize(
            &cropped,
            spec.output_width,
            spec.output_height,
            FilterType::Triangle,
        )
    }
}

/// Grabs, renders and writes frames until a stop is requested or the
/// encoder goes away. Closing stdin is what tells the encoder to flush.
async fn pump_frames(
    mut surface: Box<dyn CaptureSurface>,
    spec: PipelineSpec,
    mut stdin: ChildStdin,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1) / spec.fps.max(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = ticker.tick() => {
                let frame = match surface.grab_frame() {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("frame grab failed, stopping pump: {e}");
                        break;
                    }
                };
                let output = render_output(frame, &spec);
                if stdin.write_all(output.as_raw()).await.is_err() {
                    warn!("encoder closed its input early");
                    break;
                }
            }
        }
    }

    drop(stdin);
}

/// Reads the muxed stream, slicing it into timed data events in chunked
/// mode. Whatever remains at stream end becomes the terminal flush, followed
/// by exactly one `Finished`.
async fn collect_output(
    mut child: Child,
    mut stdout: ChildStdout,
    timeslice: Option<Duration>,
    events: mpsc::Sender<PipelineEvent>,
) {
    let mut pending: Vec<u8> = Vec::new();
    let mut read_buf = vec![0u8; READ_BUF_SIZE];
    let mut slicer = timeslice.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        tokio::select! {
            read = stdout.read(&mut read_buf) => match read {
                Ok(0) => break,
                Ok(n) => pending.extend_from_slice(&read_buf[..n]),
                Err(e) => {
                    warn!("reading encoder output failed: {e}");
                    break;
                }
            },
            _ = next_slice(&mut slicer) => {
                // Empty intervals emit nothing, like a recorder firing a
                // zero-size data event.
                if !pending.is_empty() {
                    let chunk = std::mem::take(&mut pending);
                    if events.send(PipelineEvent::Data(chunk)).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    if !pending.is_empty() {
        let tail = std::mem::take(&mut pending);
        if events.send(PipelineEvent::Data(tail)).await.is_err() {
            return;
        }
    }

    match child.wait().await {
        Ok(status) if status.success() => debug!("encoder exited cleanly"),
        Ok(status) => warn!("encoder exited with {status}"),
        Err(e) => warn!("waiting for encoder failed: {e}"),
    }

    let _ = events.send(PipelineEvent::Finished).await;
}

async fn next_slice(slicer: &mut Option<Interval>) {
    match slicer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
