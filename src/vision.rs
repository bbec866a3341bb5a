//! Frame analysis for auto-crop
//!
//! Classifies pixels as content vs. background and locates the minimal
//! bounding box around the content with a directional edge scan.

use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Axis-aligned rectangle in frame pixel coordinates.
///
/// Rectangles produced by [`content_bounds`] always lie within the scanned
/// frame and have non-zero width and height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Intersection with a `width` x `height` frame anchored at the origin.
    /// Overhang is cut off; a rectangle entirely outside comes back
    /// zero-sized.
    pub fn clip_to(self, width: u32, height: u32) -> Self {
        let x = self.x.min(width);
        let y = self.y.min(height);
        Self {
            x,
            y,
            width: self.x.saturating_add(self.width).min(width) - x,
            height: self.y.saturating_add(self.height).min(height) - y,
        }
    }
}

/// Scanned frame contained no pixel matching the content classifier.
///
/// Callers must treat this as "no region found" rather than cropping to a
/// degenerate rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no content pixels found in {width}x{height} frame")]
pub struct NoContentRegion {
    pub width: u32,
    pub height: u32,
}

fn default_threshold() -> u8 {
    30
}

fn default_min_diff() -> u16 {
    30
}

/// Decides whether a pixel belongs to the content region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PixelClassifier {
    /// Content pixels have each of their first three channels strictly below
    /// the threshold. Alpha is ignored.
    DarkBelow {
        #[serde(default = "default_threshold")]
        threshold: u8,
    },
    /// Content pixels differ from a reference background color by more than
    /// `min_diff`, summed over the first three channels. Used to peel
    /// letterbox borders off near-black backgrounds.
    AwayFrom {
        color: [u8; 3],
        #[serde(default = "default_min_diff")]
        min_diff: u16,
    },
}

impl Default for PixelClassifier {
    fn default() -> Self {
        Self::DarkBelow {
            threshold: default_threshold(),
        }
    }
}

impl PixelClassifier {
    pub fn is_foreground(&self, pixel: &Rgba<u8>) -> bool {
        let [r, g, b, _] = pixel.0;
        match *self {
            Self::DarkBelow { threshold } => r < threshold && g < threshold && b < threshold,
            Self::AwayFrom { color, min_diff } => {
                let diff = r.abs_diff(color[0]) as u16
                    + g.abs_diff(color[1]) as u16
                    + b.abs_diff(color[2]) as u16;
                diff > min_diff
            }
        }
    }
}

/// Find the minimal bounding box of all foreground pixels in `frame`.
///
/// Four directional scans, each stopping at its first hit: top-to-bottom for
/// the upper edge, bottom-to-top for the lower edge, then left-to-right and
/// right-to-left restricted to the rows already found. Worst case is
/// O(width x height) when the frame has no foreground at all; typical frames
/// exit early on every pass.
///
/// Runs once per recording start, never per frame.
pub fn content_bounds(
    frame: &RgbaImage,
    classifier: PixelClassifier,
) -> Result<Rect, NoContentRegion> {
    let (width, height) = frame.dimensions();

    // Top edge. This pass doubles as the emptiness check: if no row contains
    // a foreground pixel there is nothing to crop to.
    let mut top = None;
    'from_top: for y in 0..height {
        for x in 0..width {
            if classifier.is_foreground(frame.get_pixel(x, y)) {
                top = Some(y);
                break 'from_top;
            }
        }
    }
    let Some(min_y) = top else {
        return Err(NoContentRegion { width, height });
    };

    // Bottom edge, scanning upward. Guaranteed to hit by row `min_y`.
    let mut max_y = min_y;
    'from_bottom: for y in (min_y..height).rev() {
        for x in 0..width {
            if classifier.is_foreground(frame.get_pixel(x, y)) {
                max_y = y;
                break 'from_bottom;
            }
        }
    }

    // Left and right edges, restricted to the rows found above.
    let mut min_x = 0;
    'from_left: for x in 0..width {
        for y in min_y..=max_y {
            if classifier.is_foreground(frame.get_pixel(x, y)) {
                min_x = x;
                break 'from_left;
            }
        }
    }

    let mut max_x = min_x;
    'from_right: for x in (min_x..width).rev() {
        for y in min_y..=max_y {
            if classifier.is_foreground(frame.get_pixel(x, y)) {
                max_x = x;
                break 'from_right;
            }
        }
    }

    Ok(Rect {
        x: min_x,
        y: min_y,
        width: max_x - min_x + 1,
        height: max_y - min_y + 1,
    })
}
