//! Capture controller
//!
//! Owns the recording lifecycle for one page: locates the surface, runs the
//! one-shot crop scan, starts the encoder pipeline, and relays segments
//! upstream. There are exactly two states, idle and recording; a stop leaves
//! recording only once the pipeline's terminal flush has landed.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::pipeline::{
    scaled_dimensions, EncoderPipeline, PipelineEvent, PipelineHandle, PipelineSpec,
};
use super::surface::{CaptureSurface, SurfaceLocator};
use super::CaptureError;
use crate::data::{
    CaptureMessage, ControlCommand, ControlMessage, SegmentEnvelope, SegmentPayload,
    SessionAnnounce, SessionClose, WEBM_MIME,
};
use crate::naming::PageAddress;
use crate::vision::{content_bounds, PixelClassifier, Rect};

/// How finished video leaves the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// One terminal payload per session.
    Whole,
    /// A payload per elapsed timeslice, plus the terminal flush.
    Chunked { timeslice: Duration },
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub fps: u32,
    /// Cap on the larger output axis; 0 records at native size.
    pub max_dimension: u32,
    pub autocrop: bool,
    pub classifier: PixelClassifier,
    pub delivery: DeliveryMode,
    pub bitrate_kbps: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            fps: 25,
            max_dimension: 720,
            autocrop: true,
            classifier: PixelClassifier::default(),
            delivery: DeliveryMode::Chunked {
                timeslice: Duration::from_secs(10),
            },
            bitrate_kbps: 1000,
        }
    }
}

struct ActiveSession {
    id: Uuid,
    handle: PipelineHandle,
    stop_requested: bool,
}

pub struct CaptureController {
    page: PageAddress,
    locator: Box<dyn SurfaceLocator>,
    pipeline: Box<dyn EncoderPipeline>,
    settings: CaptureSettings,
    commands: mpsc::Receiver<ControlMessage>,
    relay_tx: mpsc::UnboundedSender<CaptureMessage>,
    session: Option<ActiveSession>,
}

impl CaptureController {
    pub fn new(
        page: PageAddress,
        locator: Box<dyn SurfaceLocator>,
        pipeline: Box<dyn EncoderPipeline>,
        settings: CaptureSettings,
        commands: mpsc::Receiver<ControlMessage>,
        relay_tx: mpsc::UnboundedSender<CaptureMessage>,
    ) -> Self {
        Self {
            page,
            locator,
            pipeline,
            settings,
            commands,
            relay_tx,
            session: None,
        }
    }

    pub async fn run(mut self) {
        info!(page = %self.page, "capture controller ready");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(message) => self.handle_command(message.command),
                    None => break,
                },
                event = next_pipeline_event(&mut self.session) => match event {
                    Some(event) => self.handle_pipeline_event(event),
                    None => {
                        warn!("pipeline ended without a terminal flush");
                        self.finish_session();
                    }
                },
            }
        }

        // The coordinator went away. Finalize any live session so the
        // encoder flushes before the process exits.
        if let Some(session) = &self.session {
            debug!(session = %session.id, "command channel closed, finalizing");
            session.handle.request_stop();
        }
        loop {
            let Some(session) = self.session.as_mut() else {
                break;
            };
            match session.handle.next_event().await {
                Some(event) => self.handle_pipeline_event(event),
                None => self.finish_session(),
            }
        }

        info!("capture controller stopped");
    }

    fn handle_command(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::StartRecording => {
                if let Err(e) = self.start_session() {
                    match e {
                        CaptureError::AlreadyRecording => warn!("start ignored: {e}"),
                        CaptureError::SurfaceNotFound => error!("cannot start recording: {e}"),
                        other => error!("recording start failed: {other}"),
                    }
                }
            }
            ControlCommand::StopRecording => {
                if let Err(e) = self.stop_session() {
                    debug!("stop ignored: {e}");
                }
            }
        }
    }

    fn start_session(&mut self) -> Result<(), CaptureError> {
        if self.session.is_some() {
            return Err(CaptureError::AlreadyRecording);
        }

        let mut surface = self.locator.locate().ok_or(CaptureError::SurfaceNotFound)?;
        let (source_width, source_height) = surface.dimensions();

        // One scan per start, never per frame. A frame with no content is a
        // warning and an uncropped recording, not a degenerate crop.
        let crop = if self.settings.autocrop {
            match self.scan_content(surface.as_mut()) {
                Ok(region) => {
                    info!(
                        x = region.x,
                        y = region.y,
                        width = region.width,
                        height = region.height,
                        "cropping to content region"
                    );
                    Some(region)
                }
                Err(CaptureError::NoRegionFound(e)) => {
                    warn!("{e}, recording the full frame");
                    None
                }
                Err(other) => return Err(other),
            }
        } else {
            None
        };

        let (base_width, base_height) = match crop {
            Some(region) => (region.width, region.height),
            None => (source_width, source_height),
        };
        let (output_width, output_height) =
            scaled_dimensions(base_width, base_height, self.settings.max_dimension);

        let spec = PipelineSpec {
            crop,
            output_width,
            output_height,
            fps: self.settings.fps,
            timeslice: match self.settings.delivery {
                DeliveryMode::Chunked { timeslice } => Some(timeslice),
                DeliveryMode::Whole => None,
            },
            bitrate_kbps: self.settings.bitrate_kbps,
        };

        let handle = self.pipeline.start(surface, spec)?;
        let id = Uuid::new_v4();
        let started_at = Utc::now();
        self.session = Some(ActiveSession {
            id,
            handle,
            stop_requested: false,
        });

        info!(
            session = %id,
            width = output_width,
            height = output_height,
            "recording started"
        );
        self.relay(CaptureMessage::RecordingStarted(SessionAnnounce {
            session_id: id,
            page: self.page.clone(),
            started_at,
        }));
        Ok(())
    }

    /// One-shot content scan on a fresh frame.
    fn scan_content(&self, surface: &mut dyn CaptureSurface) -> Result<Rect, CaptureError> {
        let frame = surface.grab_frame()?;
        Ok(content_bounds(&frame, self.settings.classifier)?)
    }

    fn stop_session(&mut self) -> Result<(), CaptureError> {
        let Some(session) = self.session.as_mut() else {
            return Err(CaptureError::NotRecording);
        };
        if session.stop_requested {
            debug!(session = %session.id, "already finalizing");
            return Ok(());
        }
        session.stop_requested = true;
        session.handle.request_stop();
        info!(session = %session.id, "finalizing recording");
        Ok(())
    }

    fn handle_pipeline_event(&mut self, event: PipelineEvent) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let session_id = session.id;

        match event {
            PipelineEvent::Data(bytes) => {
                let size = bytes.len();
                let payload = SegmentPayload::encode(bytes, WEBM_MIME);
                let envelope = SegmentEnvelope {
                    session_id,
                    payload,
                };
                let message = match self.settings.delivery {
                    DeliveryMode::Chunked { .. } => CaptureMessage::VideoChunk(envelope),
                    DeliveryMode::Whole => CaptureMessage::VideoData(envelope),
                };
                debug!(session = %session_id, bytes = size, "relaying segment");
                self.relay(message);
            }
            PipelineEvent::Finished => self.finish_session(),
        }
    }

    fn finish_session(&mut self) {
        if let Some(session) = self.session.take() {
            info!(session = %session.id, "recording stopped");
            self.relay(CaptureMessage::RecordingStopped(SessionClose {
                session_id: session.id,
                stopped_at: Utc::now(),
            }));
        }
    }

    fn relay(&self, message: CaptureMessage) {
        if self.relay_tx.send(message).is_err() {
            warn!("coordinator channel closed, message dropped");
        }
    }
}

async fn next_pipeline_event(session: &mut Option<ActiveSession>) -> Option<PipelineEvent> {
    match session {
        Some(active) => active.handle.next_event().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::surface::{CaptureSurface, PatternSpec, StaticLocator};
    use crate::vision::Rect;
    use image::RgbaImage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::watch;

    /// Pipeline that plays a fixed script: some chunks right after start,
    /// then an optional tail and the terminal flush once stopped.
    struct ScriptedPipeline {
        live_chunks: Vec<Vec<u8>>,
        final_chunk: Option<Vec<u8>>,
        starts: Arc<AtomicUsize>,
        specs: Arc<Mutex<Vec<PipelineSpec>>>,
    }

    impl ScriptedPipeline {
        fn new(live_chunks: Vec<Vec<u8>>, final_chunk: Option<Vec<u8>>) -> Self {
            Self {
                live_chunks,
                final_chunk,
                starts: Arc::new(AtomicUsize::new(0)),
                specs: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn starts(&self) -> Arc<AtomicUsize> {
            Arc::clone(&self.starts)
        }

        fn specs(&self) -> Arc<Mutex<Vec<PipelineSpec>>> {
            Arc::clone(&self.specs)
        }
    }

    impl EncoderPipeline for ScriptedPipeline {
        fn start(
            &self,
            _surface: Box<dyn CaptureSurface>,
            spec: PipelineSpec,
        ) -> Result<PipelineHandle, CaptureError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.specs.lock().unwrap().push(spec);

            let (event_tx, event_rx) = mpsc::channel(16);
            let (stop_tx, mut stop_rx) = watch::channel(false);
            let live = self.live_chunks.clone();
            let tail = self.final_chunk.clone();
            tokio::spawn(async move {
                for chunk in live {
                    let _ = event_tx.send(PipelineEvent::Data(chunk)).await;
                }
                let _ = stop_rx.changed().await;
                if let Some(chunk) = tail {
                    let _ = event_tx.send(PipelineEvent::Data(chunk)).await;
                }
                let _ = event_tx.send(PipelineEvent::Finished).await;
            });

            Ok(PipelineHandle::new(event_rx, stop_tx))
        }
    }

    /// Surface with nothing on it, so the crop scan finds no content.
    struct BlankSurface;

    impl CaptureSurface for BlankSurface {
        fn dimensions(&self) -> (u32, u32) {
            (64, 48)
        }

        fn grab_frame(&mut self) -> Result<RgbaImage, CaptureError> {
            Ok(RgbaImage::from_pixel(64, 48, image::Rgba([255; 4])))
        }
    }

    struct BlankLocator;

    impl SurfaceLocator for BlankLocator {
        fn locate(&self) -> Option<Box<dyn CaptureSurface>> {
            Some(Box::new(BlankSurface))
        }
    }

    fn page() -> PageAddress {
        PageAddress::parse("https://example.com/page").unwrap()
    }

    struct Harness {
        commands: mpsc::Sender<ControlMessage>,
        messages: mpsc::UnboundedReceiver<CaptureMessage>,
        task: tokio::task::JoinHandle<()>,
    }

    fn launch(
        locator: Box<dyn SurfaceLocator>,
        pipeline: Box<dyn EncoderPipeline>,
        settings: CaptureSettings,
    ) -> Harness {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (relay_tx, relay_rx) = mpsc::unbounded_channel();
        let controller =
            CaptureController::new(page(), locator, pipeline, settings, cmd_rx, relay_tx);
        Harness {
            commands: cmd_tx,
            messages: relay_rx,
            task: tokio::spawn(controller.run()),
        }
    }

    impl Harness {
        async fn send(&self, command: ControlCommand) {
            self.commands
                .send(ControlMessage { command })
                .await
                .unwrap();
        }

        async fn finish(self) -> Vec<CaptureMessage> {
            drop(self.commands);
            let mut messages = self.messages;
            let mut collected = Vec::new();
            while let Some(message) = messages.recv().await {
                collected.push(message);
            }
            self.task.await.unwrap();
            collected
        }
    }

    fn decode_chunk(message: &CaptureMessage) -> Vec<u8> {
        match message {
            CaptureMessage::VideoChunk(envelope) => envelope.payload.decode().unwrap(),
            other => panic!("expected videoChunk, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_double_start_keeps_single_session() {
        let pipeline = ScriptedPipeline::new(vec![], None);
        let starts = pipeline.starts();
        let harness = launch(
            Box::new(StaticLocator::with_pattern(PatternSpec::default())),
            Box::new(pipeline),
            CaptureSettings::default(),
        );

        harness.send(ControlCommand::StartRecording).await;
        harness.send(ControlCommand::StartRecording).await;
        harness.send(ControlCommand::StopRecording).await;
        let messages = harness.finish().await;

        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert!(matches!(messages[0], CaptureMessage::RecordingStarted(_)));
        assert!(matches!(
            messages.last(),
            Some(CaptureMessage::RecordingStopped(_))
        ));
        let started = messages
            .iter()
            .filter(|m| matches!(m, CaptureMessage::RecordingStarted(_)))
            .count();
        assert_eq!(started, 1);
    }

    #[tokio::test]
    async fn test_stop_without_start_emits_nothing() {
        let pipeline = ScriptedPipeline::new(vec![], None);
        let starts = pipeline.starts();
        let harness = launch(
            Box::new(StaticLocator::with_pattern(PatternSpec::default())),
            Box::new(pipeline),
            CaptureSettings::default(),
        );

        harness.send(ControlCommand::StopRecording).await;
        let messages = harness.finish().await;

        assert!(messages.is_empty());
        assert_eq!(starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_surface_absorbs_start() {
        let pipeline = ScriptedPipeline::new(vec![], None);
        let starts = pipeline.starts();
        let harness = launch(
            Box::new(StaticLocator::absent()),
            Box::new(pipeline),
            CaptureSettings::default(),
        );

        harness.send(ControlCommand::StartRecording).await;
        let messages = harness.finish().await;

        assert!(messages.is_empty());
        assert_eq!(starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_chunked_session_relays_in_order() {
        let pipeline = ScriptedPipeline::new(
            vec![b"one".to_vec(), b"two".to_vec()],
            Some(b"tail".to_vec()),
        );
        let harness = launch(
            Box::new(StaticLocator::with_pattern(PatternSpec::default())),
            Box::new(pipeline),
            CaptureSettings::default(),
        );

        harness.send(ControlCommand::StartRecording).await;
        harness.send(ControlCommand::StopRecording).await;
        let messages = harness.finish().await;

        assert_eq!(messages.len(), 5);
        let CaptureMessage::RecordingStarted(announce) = &messages[0] else {
            panic!("expected recordingStarted first");
        };
        assert_eq!(decode_chunk(&messages[1]), b"one");
        assert_eq!(decode_chunk(&messages[2]), b"two");
        assert_eq!(decode_chunk(&messages[3]), b"tail");
        let CaptureMessage::RecordingStopped(close) = &messages[4] else {
            panic!("expected recordingStopped last");
        };
        assert_eq!(close.session_id, announce.session_id);
    }

    #[tokio::test]
    async fn test_whole_capture_uses_video_data() {
        let pipeline = ScriptedPipeline::new(vec![], Some(b"whole-file".to_vec()));
        let settings = CaptureSettings {
            delivery: DeliveryMode::Whole,
            ..CaptureSettings::default()
        };
        let harness = launch(
            Box::new(StaticLocator::with_pattern(PatternSpec::default())),
            Box::new(pipeline),
            settings,
        );

        harness.send(ControlCommand::StartRecording).await;
        harness.send(ControlCommand::StopRecording).await;
        let messages = harness.finish().await;

        assert_eq!(messages.len(), 3);
        let CaptureMessage::VideoData(envelope) = &messages[1] else {
            panic!("expected videoData, got {:?}", messages[1]);
        };
        assert_eq!(envelope.payload.decode().unwrap(), b"whole-file");
    }

    #[tokio::test]
    async fn test_autocrop_shapes_pipeline_spec() {
        let pipeline = ScriptedPipeline::new(vec![], None);
        let specs = pipeline.specs();
        let harness = launch(
            Box::new(StaticLocator::with_pattern(PatternSpec::default())),
            Box::new(pipeline),
            CaptureSettings::default(),
        );

        harness.send(ControlCommand::StartRecording).await;
        harness.send(ControlCommand::StopRecording).await;
        harness.finish().await;

        let specs = specs.lock().unwrap();
        assert_eq!(specs[0].crop, Some(Rect::new(100, 50, 200, 150)));
        assert_eq!((specs[0].output_width, specs[0].output_height), (200, 150));
    }

    #[tokio::test]
    async fn test_blank_surface_records_uncropped() {
        let pipeline = ScriptedPipeline::new(vec![], None);
        let specs = pipeline.specs();
        let harness = launch(
            Box::new(BlankLocator),
            Box::new(pipeline),
            CaptureSettings::default(),
        );

        harness.send(ControlCommand::StartRecording).await;
        harness.send(ControlCommand::StopRecording).await;
        let messages = harness.finish().await;

        // The session still runs; it just records the full frame.
        assert!(matches!(messages[0], CaptureMessage::RecordingStarted(_)));
        let specs = specs.lock().unwrap();
        assert_eq!(specs[0].crop, None);
        assert_eq!((specs[0].output_width, specs[0].output_height), (64, 48));
    }

    #[test]
    fn test_scan_without_content_is_a_region_error() {
        let (_cmd_tx, cmd_rx) = mpsc::channel(1);
        let (relay_tx, _relay_rx) = mpsc::unbounded_channel();
        let controller = CaptureController::new(
            page(),
            Box::new(BlankLocator),
            Box::new(ScriptedPipeline::new(vec![], None)),
            CaptureSettings::default(),
            cmd_rx,
            relay_tx,
        );

        let err = controller.scan_content(&mut BlankSurface).unwrap_err();
        assert!(matches!(err, CaptureError::NoRegionFound(_)));
    }

    #[tokio::test]
    async fn test_autocrop_disabled_skips_scan() {
        let pipeline = ScriptedPipeline::new(vec![], None);
        let specs = pipeline.specs();
        let settings = CaptureSettings {
            autocrop: false,
            ..CaptureSettings::default()
        };
        let harness = launch(
            Box::new(StaticLocator::with_pattern(PatternSpec::default())),
            Box::new(pipeline),
            settings,
        );

        harness.send(ControlCommand::StartRecording).await;
        harness.send(ControlCommand::StopRecording).await;
        harness.finish().await;

        let specs = specs.lock().unwrap();
        assert_eq!(specs[0].crop, None);
        assert_eq!((specs[0].output_width, specs[0].output_height), (800, 600));
    }

    #[tokio::test]
    async fn test_scaling_applies_to_cropped_region() {
        let pipeline = ScriptedPipeline::new(vec![], None);
        let specs = pipeline.specs();
        let settings = CaptureSettings {
            max_dimension: 100,
            ..CaptureSettings::default()
        };
        let harness = launch(
            Box::new(StaticLocator::with_pattern(PatternSpec::default())),
            Box::new(pipeline),
            settings,
        );

        harness.send(ControlCommand::StartRecording).await;
        harness.send(ControlCommand::StopRecording).await;
        harness.finish().await;

        // Content region is 200x150; capped at 100 on the larger axis.
        let specs = specs.lock().unwrap();
        assert_eq!(specs[0].crop, Some(Rect::new(100, 50, 200, 150)));
        assert_eq!((specs[0].output_width, specs[0].output_height), (100, 76));
    }
}
