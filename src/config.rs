//! Configuration management for canvas-cast

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::capture::{CaptureSettings, DeliveryMode, PatternSpec};
use crate::coordinator::CounterScope;
use crate::naming::PageAddress;
use crate::vision::{PixelClassifier, Rect};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Page being captured (drives output naming)
    #[serde(default)]
    pub page: PageConfig,

    /// Capture configuration (frame rate, cropping, surface)
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Recording configuration (delivery, encoder settings)
    #[serde(default)]
    pub recording: RecordingConfig,

    /// Storage configuration (where saves land, chunk numbering)
    #[serde(default)]
    pub storage: StorageConfig,

    /// Path to config file (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageConfig {
    /// Address of the page whose canvas is being recorded.
    /// Host and path become the output file name.
    #[serde(default = "default_page_address")]
    pub address: PageAddress,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Frames grabbed per second
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Output frames are scaled so the larger side fits this
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,

    /// Crop each session to the content bounding box found at start
    #[serde(default = "default_true")]
    pub autocrop: bool,

    /// How foreground pixels are told apart from backdrop
    #[serde(default = "default_classifier")]
    pub classifier: PixelClassifier,

    /// Synthetic surface dimensions and content placement
    #[serde(default)]
    pub surface: SurfaceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurfaceConfig {
    #[serde(default = "default_surface_width")]
    pub width: u32,

    #[serde(default = "default_surface_height")]
    pub height: u32,

    /// Where the drawn content sits on the surface
    #[serde(default = "default_surface_content")]
    pub content: Rect,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Deliver one file per session or a stream of chunks
    #[serde(default = "default_delivery")]
    pub delivery: DeliveryChoice,

    /// Timeslice between chunk emissions (chunked delivery only)
    #[serde(default = "default_chunk_seconds")]
    pub chunk_seconds: u64,

    /// Target video bitrate
    #[serde(default = "default_bitrate_kbps")]
    pub bitrate_kbps: u32,

    /// Whether to fire one toggle automatically on launch
    #[serde(default)]
    pub autostart: bool,

    /// Encoder binary to spawn (defaults to `ffmpeg` on PATH)
    pub encoder: Option<PathBuf>,
}

/// Serialized form of the delivery mode; the timeslice lives in
/// `chunk_seconds` so a plain string is enough here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryChoice {
    Chunked,
    Whole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory captures are written into
    #[serde(default = "default_output_directory")]
    pub output_directory: PathBuf,

    /// Whether chunk numbering restarts per session or runs on
    #[serde(default)]
    pub counter_scope: CounterScope,
}

// Default value functions
fn default_page_address() -> PageAddress {
    PageAddress::parse("https://example.com/page").expect("default page address parses")
}

fn default_fps() -> u32 {
    25
}

fn default_max_dimension() -> u32 {
    720
}

fn default_true() -> bool {
    true
}

fn default_classifier() -> PixelClassifier {
    PixelClassifier::default()
}

fn default_surface_width() -> u32 {
    800
}

fn default_surface_height() -> u32 {
    600
}

fn default_surface_content() -> Rect {
    Rect::new(100, 50, 200, 150)
}

fn default_delivery() -> DeliveryChoice {
    DeliveryChoice::Chunked
}

fn default_chunk_seconds() -> u64 {
    10
}

fn default_bitrate_kbps() -> u32 {
    1000
}

fn default_output_directory() -> PathBuf {
    directories::UserDirs::new()
        .and_then(|dirs| dirs.download_dir().map(|d| d.join("canvas-cast")))
        .unwrap_or_else(|| std::env::temp_dir().join("canvas-cast-captures"))
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            address: default_page_address(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            max_dimension: default_max_dimension(),
            autocrop: true,
            classifier: default_classifier(),
            surface: SurfaceConfig::default(),
        }
    }
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            width: default_surface_width(),
            height: default_surface_height(),
            content: default_surface_content(),
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            delivery: default_delivery(),
            chunk_seconds: default_chunk_seconds(),
            bitrate_kbps: default_bitrate_kbps(),
            autostart: false,
            encoder: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_directory: default_output_directory(),
            counter_scope: CounterScope::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page: PageConfig::default(),
            capture: CaptureConfig::default(),
            recording: RecordingConfig::default(),
            storage: StorageConfig::default(),
            config_path: None,
        }
    }
}

impl Config {
    /// Load configuration from default location or create default
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

            let mut config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;

            config.config_path = Some(config_path);
            Ok(config)
        } else {
            // Create default config
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = self
            .config_path
            .clone()
            .unwrap_or_else(|| Self::default_config_path().expect("Failed to get config path"));

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    /// Get the config file path
    pub fn config_path(&self) -> PathBuf {
        self.config_path
            .clone()
            .unwrap_or_else(|| Self::default_config_path().expect("Failed to get config path"))
    }

    /// Get default config path
    fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = directories::ProjectDirs::from("dev", "canvas-cast", "agent")
            .context("Failed to determine config directory")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Capture settings assembled from the capture and recording sections
    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            fps: self.capture.fps,
            max_dimension: self.capture.max_dimension,
            autocrop: self.capture.autocrop,
            classifier: self.capture.classifier,
            delivery: self.delivery_mode(),
            bitrate_kbps: self.recording.bitrate_kbps,
        }
    }

    /// Delivery mode with the configured timeslice applied
    pub fn delivery_mode(&self) -> DeliveryMode {
        match self.recording.delivery {
            DeliveryChoice::Chunked => DeliveryMode::Chunked {
                timeslice: Duration::from_secs(self.recording.chunk_seconds),
            },
            DeliveryChoice::Whole => DeliveryMode::Whole,
        }
    }

    /// Spec for the synthetic capture surface
    pub fn pattern_spec(&self) -> PatternSpec {
        PatternSpec {
            width: self.capture.surface.width,
            height: self.capture.surface.height,
            content: self.capture.surface.content,
        }
    }
}
