//! Recording indicator
//!
//! The visible surface is a pair of generated icon files, one per toggle
//! state, and a `current` file kept in sync with the engine's broadcast
//! status. Whatever shell shows the icon only has to watch that file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{Rgba, RgbaImage};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::coordinator::EngineStatus;

const ICON_SIZE: u32 = 32;
const IDLE_DOT: [u8; 4] = [158, 158, 158, 255];
const RECORDING_DOT: [u8; 4] = [211, 47, 47, 255];

/// Two visual states, nothing in between. A failed session never shows up
/// here because the engine never broadcasts one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum IconState {
    Idle,
    Recording,
}

impl IconState {
    fn from_status(status: EngineStatus) -> Self {
        match status {
            EngineStatus::Idle => Self::Idle,
            EngineStatus::Recording => Self::Recording,
        }
    }
}

struct IconPaths {
    idle: PathBuf,
    recording: PathBuf,
    current: PathBuf,
}

impl IconPaths {
    fn for_state(&self, state: IconState) -> &Path {
        match state {
            IconState::Idle => &self.idle,
            IconState::Recording => &self.recording,
        }
    }
}

pub struct RecordingIndicator {
    status_rx: broadcast::Receiver<EngineStatus>,
    paths: IconPaths,
    state: IconState,
}

impl RecordingIndicator {
    pub fn new(status_rx: broadcast::Receiver<EngineStatus>) -> Result<Self> {
        let paths = prepare_icons_in(default_icon_dir())?;
        let indicator = Self {
            status_rx,
            paths,
            state: IconState::Idle,
        };
        indicator.publish()?;
        Ok(indicator)
    }

    /// Mirror engine status into the icon until the engine goes away.
    /// Blocks the calling thread.
    pub fn run(mut self) {
        info!("recording indicator running");

        loop {
            match self.status_rx.try_recv() {
                Ok(status) => self.apply(IconState::from_status(status)),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("missed {} status updates", n);
                }
                Err(broadcast::error::TryRecvError::Empty) => {}
                Err(broadcast::error::TryRecvError::Closed) => {
                    info!("status channel closed, indicator exiting");
                    break;
                }
            }

            std::thread::sleep(std::time::Duration::from_millis(16));
        }
    }

    fn apply(&mut self, state: IconState) {
        if state == self.state {
            return;
        }
        self.state = state;
        debug!(?state, "indicator state changed");
        if let Err(e) = self.publish() {
            warn!("updating indicator icon failed: {e}");
        }
    }

    fn publish(&self) -> Result<()> {
        let source = self.paths.for_state(self.state);
        std::fs::copy(source, &self.paths.current)
            .with_context(|| format!("publishing {}", source.display()))?;
        Ok(())
    }
}

fn default_icon_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "canvas-cast", "agent")
        .map(|p| p.cache_dir().to_path_buf())
        .unwrap_or_else(std::env::temp_dir)
}

fn prepare_icons_in(icon_dir: PathBuf) -> Result<IconPaths> {
    std::fs::create_dir_all(&icon_dir)
        .with_context(|| format!("creating icon directory {}", icon_dir.display()))?;

    let paths = IconPaths {
        idle: icon_dir.join("indicator_idle.png"),
        recording: icon_dir.join("indicator_recording.png"),
        current: icon_dir.join("indicator.png"),
    };

    if !paths.idle.exists() || !paths.recording.exists() {
        create_indicator_icons(&paths)?;
        info!("created indicator icons in {:?}", icon_dir);
    }

    Ok(paths)
}

fn create_indicator_icons(paths: &IconPaths) -> Result<()> {
    let base = base_icon(ICON_SIZE);
    let variants = [
        (IconState::Idle, IDLE_DOT, &paths.idle),
        (IconState::Recording, RECORDING_DOT, &paths.recording),
    ];

    for (state, color, path) in variants {
        let mut img = base.clone();
        apply_status_dot(&mut img, color);
        img.save(path)?;
        debug!("indicator icon generated for {:?}: {:?}", state, path);
    }

    Ok(())
}

fn base_icon(size: u32) -> RgbaImage {
    let center = size as f32 / 2.0;
    let radius = center - 2.0;
    RgbaImage::from_fn(size, size, |x, y| {
        let dx = x as f32 - center;
        let dy = y as f32 - center;
        if (dx * dx + dy * dy).sqrt() < radius {
            Rgba([68, 68, 68, 255])
        } else {
            Rgba([0, 0, 0, 0])
        }
    })
}

fn apply_status_dot(img: &mut RgbaImage, color: [u8; 4]) {
    let size = img.width().min(img.height());
    if size == 0 {
        return;
    }

    let radius = size as f32 * 0.18;
    let cx = size as f32 - radius - 2.0;
    let cy = size as f32 - radius - 2.0;

    for (x, y, pixel) in img.enumerate_pixels_mut() {
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        if (dx * dx + dy * dy).sqrt() <= radius {
            *pixel = Rgba(color);
        }
    }
}
