//! Media Pipeline
//!
//! Frames, scan regions, sampling and the video source the scan loop reads from.

use image::RgbaImage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub mod region;
pub mod sampler;
pub mod source;

pub use region::{default_scan_region, ScanRegion, ScanRegionCalculator, DEFAULT_CANVAS_SIZE};
pub use sampler::FrameCanvas;
pub use source::{ReadyState, VideoSource};

/// Global frame ID counter for unique frame identification
static FRAME_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate a new unique frame ID
pub fn next_frame_id() -> u64 {
    FRAME_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A captured video frame
///
/// Pixel data is shared so the camera feed, the video source and the sampler
/// can hold the same frame without copying ~8MB per 1080p frame.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Unique frame ID (monotonically increasing)
    pub frame_id: u64,
    pub width: u32,
    pub height: u32,
    /// RGBA pixels, `width * height * 4` bytes
    pub image: Arc<RgbaImage>,
    pub timestamp: Instant,
}

impl VideoFrame {
    pub fn new(image: Arc<RgbaImage>) -> Self {
        let (width, height) = image.dimensions();
        Self {
            frame_id: next_frame_id(),
            width,
            height,
            image,
            timestamp: Instant::now(),
        }
    }

    pub fn from_image(image: RgbaImage) -> Self {
        Self::new(Arc::new(image))
    }
}

/// A point in source-frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Result of a successful decode
#[derive(Debug, Clone, PartialEq)]
pub struct ScanResult {
    /// Decoded payload
    pub data: String,
    /// Symbol corners (top-left, top-right, bottom-right, bottom-left)
    /// in the coordinate space of the bitmap or frame they refer to
    pub corner_points: Vec<Point>,
}

impl ScanResult {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            corner_points: Vec::new(),
        }
    }

    pub fn with_corner_points(mut self, corner_points: Vec<Point>) -> Self {
        self.corner_points = corner_points;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_ids_increase() {
        let a = VideoFrame::from_image(RgbaImage::new(4, 2));
        let b = VideoFrame::from_image(RgbaImage::new(4, 2));
        assert!(b.frame_id > a.frame_id);
        assert_eq!((a.width, a.height), (4, 2));
    }
}
