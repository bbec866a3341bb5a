//! Capture surfaces
//!
//! A surface is the pixel source being recorded. The locator seam stands in
//! for the original's page query for its canvas element: locating can fail,
//! and every recording start locates afresh.

use image::{Rgba, RgbaImage};

use super::CaptureError;
use crate::vision::Rect;

const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);
const CONTENT: Rgba<u8> = Rgba([12, 12, 12, 255]);
const HIGHLIGHT: Rgba<u8> = Rgba([238, 196, 32, 255]);
const HIGHLIGHT_SIZE: u32 = 24;

/// Pixel source for one recording.
pub trait CaptureSurface: Send {
    fn dimensions(&self) -> (u32, u32);

    /// Renders and returns the current frame. Called once per tick at the
    /// capture rate.
    fn grab_frame(&mut self) -> Result<RgbaImage, CaptureError>;
}

/// Finds the capture surface, if the page has one.
pub trait SurfaceLocator: Send {
    fn locate(&self) -> Option<Box<dyn CaptureSurface>>;
}

/// Geometry of the synthetic canvas surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternSpec {
    pub width: u32,
    pub height: u32,
    pub content: Rect,
}

impl Default for PatternSpec {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            content: Rect::new(100, 50, 200, 150),
        }
    }
}

/// Synthetic canvas: a dark content region on a white field, with a small
/// moving highlight inside the region so captured video is not static.
pub struct PatternSurface {
    spec: PatternSpec,
    tick: u64,
}

impl PatternSurface {
    pub fn new(spec: PatternSpec) -> Self {
        // The content rect comes from config; clip it so painting stays
        // inside the frame.
        let spec = PatternSpec {
            content: spec.content.clip_to(spec.width, spec.height),
            ..spec
        };
        Self { spec, tick: 0 }
    }
}

impl CaptureSurface for PatternSurface {
    fn dimensions(&self) -> (u32, u32) {
        (self.spec.width, self.spec.height)
    }

    fn grab_frame(&mut self) -> Result<RgbaImage, CaptureError> {
        let mut frame = RgbaImage::from_pixel(self.spec.width, self.spec.height, BACKGROUND);

        let content = self.spec.content;
        for y in content.y..content.y + content.height {
            for x in content.x..content.x + content.width {
                frame.put_pixel(x, y, CONTENT);
            }
        }

        // Bounce the highlight around inside the content region. It never
        // fills a full edge row or column, so the content bounding box is
        // unchanged by it.
        if content.width > HIGHLIGHT_SIZE && content.height > HIGHLIGHT_SIZE {
            let span_x = (content.width - HIGHLIGHT_SIZE) as u64;
            let span_y = (content.height - HIGHLIGHT_SIZE) as u64;
            let offset_x = content.x + ((self.tick * 3) % span_x) as u32;
            let offset_y = content.y + ((self.tick * 2) % span_y) as u32;
            for y in offset_y..offset_y + HIGHLIGHT_SIZE {
                for x in offset_x..offset_x + HIGHLIGHT_SIZE {
                    frame.put_pixel(x, y, HIGHLIGHT);
                }
            }
        }

        self.tick += 1;
        Ok(frame)
    }
}

/// Locator with a fixed answer: the configured pattern surface, or nothing.
pub struct StaticLocator {
    spec: Option<PatternSpec>,
}

impl StaticLocator {
    pub fn with_pattern(spec: PatternSpec) -> Self {
        Self { spec: Some(spec) }
    }

    /// A page without a capture surface.
    pub fn absent() -> Self {
        Self { spec: None }
    }
}

impl SurfaceLocator for StaticLocator {
    fn locate(&self) -> Option<Box<dyn CaptureSurface>> {
        self.spec
            .map(|spec| Box::new(PatternSurface::new(spec)) as Box<dyn CaptureSurface>)
    }
}
