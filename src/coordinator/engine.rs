//! Coordinator engine
//!
//! Select loop joining the user's toggle triggers, the capture controller's
//! message stream, and a background save task. Owns the session registry,
//! derives save paths, and assigns chunk sequence numbers when segments
//! arrive. Command relay and saves are fire-and-forget: nothing here blocks
//! on the controller or on storage, and failures surface in logs only.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{EngineCommand, EngineStatus, RecordingToggle};
use crate::data::{CaptureMessage, ControlMessage, SegmentEnvelope, SegmentPayload};
use crate::naming::{PageAddress, SavePlan};
use crate::storage::SegmentStore;

const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Reset boundary for chunk sequence numbers.
///
/// Numbers are handed out when a chunk arrives, not when it was captured;
/// the channel between controller and coordinator is FIFO, so arrival order
/// is capture order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterScope {
    /// Numbering restarts with every session.
    #[default]
    Session,
    /// One counter for the process lifetime, never reset.
    Process,
}

struct SessionRecord {
    page: PageAddress,
    next_chunk: u64,
}

enum SaveMessage {
    StartSession(Uuid),
    Save(SaveRequest),
}

struct SaveRequest {
    session_id: Uuid,
    plan: SavePlan,
    payload: SegmentPayload,
}

/// Admission gate inside the save task. A request tagged with anything but
/// the active session is dropped, so a late save can never land under a
/// newer session's name.
#[derive(Default)]
struct SessionGate {
    active: Option<Uuid>,
}

impl SessionGate {
    fn begin(&mut self, session_id: Uuid) {
        self.active = Some(session_id);
    }

    fn admits(&mut self, session_id: Uuid) -> bool {
        match self.active {
            Some(active) => active == session_id,
            None => {
                self.active = Some(session_id);
                true
            }
        }
    }

    fn active(&self) -> Option<Uuid> {
        self.active
    }
}

pub struct CoordinatorEngine {
    cmd_rx: mpsc::Receiver<EngineCommand>,
    status_tx: broadcast::Sender<EngineStatus>,
    control_tx: mpsc::Sender<ControlMessage>,
    capture_rx: mpsc::UnboundedReceiver<CaptureMessage>,
    toggle: RecordingToggle,
    counter_scope: CounterScope,
    process_counter: u64,
    sessions: HashMap<Uuid, SessionRecord>,
    store: SegmentStore,
    save_tx: Option<mpsc::UnboundedSender<SaveMessage>>,
    /// Save queue receiver (taken once when run() starts)
    save_rx: Option<mpsc::UnboundedReceiver<SaveMessage>>,
    save_task: Option<JoinHandle<()>>,
}

impl CoordinatorEngine {
    pub fn new(
        cmd_rx: mpsc::Receiver<EngineCommand>,
        status_tx: broadcast::Sender<EngineStatus>,
        control_tx: mpsc::Sender<ControlMessage>,
        capture_rx: mpsc::UnboundedReceiver<CaptureMessage>,
        store: SegmentStore,
        counter_scope: CounterScope,
    ) -> Self {
        let (save_tx, save_rx) = mpsc::unbounded_channel();

        Self {
            cmd_rx,
            status_tx,
            control_tx,
            capture_rx,
            toggle: RecordingToggle::new(),
            counter_scope,
            process_counter: 0,
            sessions: HashMap::new(),
            store,
            save_tx: Some(save_tx),
            save_rx: Some(save_rx),
            save_task: None,
        }
    }

    /// Spawn the background task that decodes and writes segments
    fn spawn_save_task(
        mut save_rx: mpsc::UnboundedReceiver<SaveMessage>,
        store: SegmentStore,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut gate = SessionGate::default();

            while let Some(message) = save_rx.recv().await {
                match message {
                    SaveMessage::StartSession(session_id) => {
                        gate.begin(session_id);
                        debug!(session = %session_id, "save task bound to session");
                    }
                    SaveMessage::Save(request) => {
                        if !gate.admits(request.session_id) {
                            warn!(
                                "dropping segment {} from session {} (active session {:?})",
                                request.plan,
                                request.session_id,
                                gate.active()
                            );
                            continue;
                        }
                        match store.save(&request.plan, request.payload).await {
                            Ok(saved) => {
                                info!(
                                    path = %saved.path.display(),
                                    bytes = saved.bytes,
                                    "segment saved"
                                );
                            }
                            Err(e) => error!("failed to save segment {}: {e}", request.plan),
                        }
                    }
                }
            }

            debug!("save task drained");
        })
    }

    pub async fn run(&mut self) {
        info!("coordinator engine started");

        // Spawn background save task (must be done inside async context)
        if let Some(save_rx) = self.save_rx.take() {
            self.save_task = Some(Self::spawn_save_task(save_rx, self.store.clone()));
        }

        loop {
            tokio::select! {
                command = self.cmd_rx.recv() => match command {
                    Some(EngineCommand::Toggle) => self.handle_toggle().await,
                    Some(EngineCommand::Shutdown) => {
                        info!("shutdown requested");
                        break;
                    }
                    None => break,
                },
                Some(message) = self.capture_rx.recv() => {
                    self.handle_capture_message(message);
                }
            }
        }

        self.shutdown().await;
    }

    async fn handle_toggle(&mut self) {
        let command = self.toggle.toggle();
        let status = self.toggle.status();
        // The icon follows the flag, not the controller's fate: status goes
        // out before the relay, and a relay failure does not reverse it.
        let _ = self.status_tx.send(status);
        info!(?status, "recording toggle flipped");

        if self.control_tx.send(ControlMessage { command }).await.is_err() {
            warn!("capture controller unavailable, command dropped");
        }
    }

    fn handle_capture_message(&mut self, message: CaptureMessage) {
        match message {
            CaptureMessage::RecordingStarted(announce) => {
                info!(
                    session = %announce.session_id,
                    page = %announce.page,
                    "session started"
                );
                // One live session at a time: a fresh start supersedes
                // whatever came before it.
                self.sessions.clear();
                self.sessions.insert(
                    announce.session_id,
                    SessionRecord {
                        page: announce.page,
                        next_chunk: 0,
                    },
                );
                self.send_save(SaveMessage::StartSession(announce.session_id));
            }
            CaptureMessage::VideoChunk(envelope) => self.sink_chunk(envelope),
            CaptureMessage::VideoData(envelope) => self.sink_whole(envelope),
            CaptureMessage::RecordingStopped(close) => {
                info!(session = %close.session_id, "session stopped");
            }
        }
    }

    fn sink_chunk(&mut self, envelope: SegmentEnvelope) {
        let Some(record) = self.sessions.get_mut(&envelope.session_id) else {
            warn!(session = %envelope.session_id, "chunk from unknown session dropped");
            return;
        };

        let sequence = match self.counter_scope {
            CounterScope::Session => {
                let n = record.next_chunk;
                record.next_chunk += 1;
                n
            }
            CounterScope::Process => {
                let n = self.process_counter;
                self.process_counter += 1;
                n
            }
        };

        let plan = SavePlan::chunk(&record.page, sequence);
        debug!(session = %envelope.session_id, sequence, "chunk arrived");
        self.send_save(SaveMessage::Save(SaveRequest {
            session_id: envelope.session_id,
            plan,
            payload: envelope.payload,
        }));
    }

    fn sink_whole(&mut self, envelope: SegmentEnvelope) {
        let Some(record) = self.sessions.get(&envelope.session_id) else {
            warn!(session = %envelope.session_id, "capture from unknown session dropped");
            return;
        };

        let plan = SavePlan::whole_capture(&record.page);
        debug!(session = %envelope.session_id, "whole capture arrived");
        self.send_save(SaveMessage::Save(SaveRequest {
            session_id: envelope.session_id,
            plan,
            payload: envelope.payload,
        }));
    }

    fn send_save(&self, message: SaveMessage) {
        match &self.save_tx {
            Some(tx) => {
                if tx.send(message).is_err() {
                    error!("save task gone, segment lost");
                }
            }
            None => error!("save channel closed, segment lost"),
        }
    }

    /// Stop any live recording, drain its tail, and flush queued saves.
    async fn shutdown(&mut self) {
        if self.toggle.is_recording() {
            let command = self.toggle.toggle();
            let _ = self.status_tx.send(self.toggle.status());
            if self
                .control_tx
                .send(ControlMessage { command })
                .await
                .is_ok()
            {
                let drain = async {
                    while let Some(message) = self.capture_rx.recv().await {
                        let stopped = matches!(&message, CaptureMessage::RecordingStopped(_));
                        self.handle_capture_message(message);
                        if stopped {
                            break;
                        }
                    }
                };
                if tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, drain)
                    .await
                    .is_err()
                {
                    warn!("timed out waiting for the recording to finalize");
                }
            }
        }

        // Segments already relayed still get sunk before the process exits.
        while let Ok(message) = self.capture_rx.try_recv() {
            self.handle_capture_message(message);
        }

        // Closing the channel lets the save task finish its queue and exit.
        self.save_tx.take();
        if let Some(task) = self.save_task.take() {
            if let Err(e) = task.await {
                error!("save task failed: {e}");
            }
        }

        info!("coordinator engine stopped");
    }
}

/// Create command and status channels for the engine
pub fn create_engine_channels() -> (
    mpsc::Sender<EngineCommand>,
    mpsc::Receiver<EngineCommand>,
    broadcast::Sender<EngineStatus>,
    broadcast::Receiver<EngineStatus>,
) {
    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let (status_tx, status_rx) = broadcast::channel(16);
    (cmd_tx, cmd_rx, status_tx, status_rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ControlCommand, SessionAnnounce, SessionClose, WEBM_MIME};
    use chrono::Utc;
    use tempfile::TempDir;

    fn page() -> PageAddress {
        PageAddress::parse("https://example.com/page").unwrap()
    }

    fn announce(session_id: Uuid) -> CaptureMessage {
        CaptureMessage::RecordingStarted(SessionAnnounce {
            session_id,
            page: page(),
            started_at: Utc::now(),
        })
    }

    fn chunk(session_id: Uuid, bytes: &[u8]) -> CaptureMessage {
        CaptureMessage::VideoChunk(SegmentEnvelope {
            session_id,
            payload: SegmentPayload::encode(bytes.to_vec(), WEBM_MIME),
        })
    }

    fn close(session_id: Uuid) -> CaptureMessage {
        CaptureMessage::RecordingStopped(SessionClose {
            session_id,
            stopped_at: Utc::now(),
        })
    }

    struct EngineHarness {
        cmd_tx: mpsc::Sender<EngineCommand>,
        status_rx: broadcast::Receiver<EngineStatus>,
        control_rx: Option<mpsc::Receiver<ControlMessage>>,
        capture_tx: mpsc::UnboundedSender<CaptureMessage>,
        task: JoinHandle<()>,
        dir: TempDir,
    }

    fn launch(scope: CounterScope) -> EngineHarness {
        let dir = TempDir::new().unwrap();
        let store = SegmentStore::new(dir.path().to_path_buf());
        let (cmd_tx, cmd_rx, status_tx, status_rx) = create_engine_channels();
        let (control_tx, control_rx) = mpsc::channel(8);
        let (capture_tx, capture_rx) = mpsc::unbounded_channel();
        let mut engine =
            CoordinatorEngine::new(cmd_rx, status_tx, control_tx, capture_rx, store, scope);
        let task = tokio::spawn(async move { engine.run().await });
        EngineHarness {
            cmd_tx,
            status_rx,
            control_rx: Some(control_rx),
            capture_tx,
            task,
            dir,
        }
    }

    impl EngineHarness {
        async fn shutdown(self) -> TempDir {
            self.cmd_tx.send(EngineCommand::Shutdown).await.unwrap();
            self.task.await.unwrap();
            self.dir
        }
    }

    fn saved(dir: &TempDir, relative: &str) -> Vec<u8> {
        std::fs::read(dir.path().join(relative)).unwrap()
    }

    #[test]
    fn test_session_gate_tracks_active_session() {
        let mut gate = SessionGate::default();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        gate.begin(a);
        assert!(gate.admits(a));
        assert!(!gate.admits(b));

        gate.begin(b);
        assert!(gate.admits(b));
        assert!(!gate.admits(a));
    }

    #[test]
    fn test_session_gate_adopts_first_seen_session() {
        let mut gate = SessionGate::default();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(gate.admits(a));
        assert!(!gate.admits(b));
    }

    #[tokio::test]
    async fn test_toggle_relays_alternating_commands() {
        let mut harness = launch(CounterScope::Session);
        let mut control_rx = harness.control_rx.take().unwrap();

        harness.cmd_tx.send(EngineCommand::Toggle).await.unwrap();
        assert_eq!(
            control_rx.recv().await.unwrap().command,
            ControlCommand::StartRecording
        );
        assert_eq!(
            harness.status_rx.recv().await.unwrap(),
            EngineStatus::Recording
        );

        harness.cmd_tx.send(EngineCommand::Toggle).await.unwrap();
        assert_eq!(
            control_rx.recv().await.unwrap().command,
            ControlCommand::StopRecording
        );
        assert_eq!(harness.status_rx.recv().await.unwrap(), EngineStatus::Idle);

        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_status_follows_flag_without_controller() {
        let mut harness = launch(CounterScope::Session);
        // Controller gone: relay fails, but the icon still follows the flag.
        drop(harness.control_rx.take());

        harness.cmd_tx.send(EngineCommand::Toggle).await.unwrap();
        assert_eq!(
            harness.status_rx.recv().await.unwrap(),
            EngineStatus::Recording
        );

        harness.cmd_tx.send(EngineCommand::Toggle).await.unwrap();
        assert_eq!(harness.status_rx.recv().await.unwrap(), EngineStatus::Idle);

        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_chunks_numbered_at_arrival_per_session() {
        let harness = launch(CounterScope::Session);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        harness.capture_tx.send(announce(first)).unwrap();
        harness.capture_tx.send(chunk(first, b"aa")).unwrap();
        harness.capture_tx.send(chunk(first, b"bb")).unwrap();
        harness.capture_tx.send(close(first)).unwrap();

        harness.capture_tx.send(announce(second)).unwrap();
        harness.capture_tx.send(chunk(second, b"cc")).unwrap();

        let dir = harness.shutdown().await;
        assert_eq!(saved(&dir, "example-com/page/chunk_0.webm"), b"aa");
        assert_eq!(saved(&dir, "example-com/page/chunk_1.webm"), b"bb");
        // Session scope resets the counter; the store uniquifies the collision.
        assert_eq!(saved(&dir, "example-com/page/chunk_0 (1).webm"), b"cc");
    }

    #[tokio::test]
    async fn test_process_scope_never_resets() {
        let harness = launch(CounterScope::Process);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        harness.capture_tx.send(announce(first)).unwrap();
        harness.capture_tx.send(chunk(first, b"aa")).unwrap();
        harness.capture_tx.send(chunk(first, b"bb")).unwrap();
        harness.capture_tx.send(announce(second)).unwrap();
        harness.capture_tx.send(chunk(second, b"cc")).unwrap();

        let dir = harness.shutdown().await;
        assert_eq!(saved(&dir, "example-com/page/chunk_0.webm"), b"aa");
        assert_eq!(saved(&dir, "example-com/page/chunk_1.webm"), b"bb");
        assert_eq!(saved(&dir, "example-com/page/chunk_2.webm"), b"cc");
    }

    #[tokio::test]
    async fn test_unknown_session_segments_dropped() {
        let harness = launch(CounterScope::Session);

        harness.capture_tx.send(chunk(Uuid::new_v4(), b"zz")).unwrap();

        let dir = harness.shutdown().await;
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_whole_capture_saved_under_derived_name() {
        let harness = launch(CounterScope::Session);
        let session = Uuid::new_v4();

        harness.capture_tx.send(announce(session)).unwrap();
        harness
            .capture_tx
            .send(CaptureMessage::VideoData(SegmentEnvelope {
                session_id: session,
                payload: SegmentPayload::encode(b"whole".to_vec(), WEBM_MIME),
            }))
            .unwrap();

        let dir = harness.shutdown().await;
        assert_eq!(saved(&dir, "example-com-page.webm"), b"whole");
    }

    #[tokio::test]
    async fn test_shutdown_stops_live_recording_first() {
        let mut harness = launch(CounterScope::Session);
        let mut control_rx = harness.control_rx.take().unwrap();

        harness.cmd_tx.send(EngineCommand::Toggle).await.unwrap();
        assert_eq!(
            control_rx.recv().await.unwrap().command,
            ControlCommand::StartRecording
        );

        harness.cmd_tx.send(EngineCommand::Shutdown).await.unwrap();

        // Seeing the relayed stop means the engine is draining; answering
        // with a close lets it finish without waiting out the timeout.
        assert_eq!(
            control_rx.recv().await.unwrap().command,
            ControlCommand::StopRecording
        );
        harness.capture_tx.send(close(Uuid::new_v4())).unwrap();
        harness.task.await.unwrap();
    }
}
