//! Scan Region Calculator
//!
//! Picks the part of a frame that is handed to the decode engine and the
//! bitmap size it is scaled to.

use std::sync::Arc;

use super::Point;

/// Bitmap edge length used when no downscale target is configured.
pub const DEFAULT_CANVAS_SIZE: u32 = 400;

/// Sub-rectangle of a frame to sample, in native frame pixels,
/// plus the size of the bitmap the region is scaled into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub downscaled_width: u32,
    pub downscaled_height: u32,
}

impl ScanRegion {
    /// Region covering a whole frame at its native resolution
    pub fn full_frame(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
            downscaled_width: width,
            downscaled_height: height,
        }
    }

    /// Clamp the region into a `frame_width` x `frame_height` frame.
    ///
    /// Keeps every extent at least one pixel so the sampler never sees an
    /// empty rectangle.
    pub fn clamped(self, frame_width: u32, frame_height: u32) -> Self {
        let frame_width = frame_width.max(1);
        let frame_height = frame_height.max(1);
        let x = self.x.min(frame_width - 1);
        let y = self.y.min(frame_height - 1);
        let width = self.width.clamp(1, frame_width - x);
        let height = self.height.clamp(1, frame_height - y);
        Self {
            x,
            y,
            width,
            height,
            downscaled_width: self.downscaled_width.max(1),
            downscaled_height: self.downscaled_height.max(1),
        }
    }

    /// Map a point in the downscaled bitmap back into frame coordinates
    pub fn to_frame_point(&self, point: Point) -> Point {
        Point::new(
            self.x as f32 + point.x * self.width as f32 / self.downscaled_width.max(1) as f32,
            self.y as f32 + point.y * self.height as f32 / self.downscaled_height.max(1) as f32,
        )
    }

    /// Whether the region lies fully inside the frame
    pub fn fits_within(&self, frame_width: u32, frame_height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.x.saturating_add(self.width) <= frame_width
            && self.y.saturating_add(self.height) <= frame_height
    }
}

/// User supplied region policy: `(frame_width, frame_height) -> region`
pub type ScanRegionCalculator = Arc<dyn Fn(u32, u32) -> ScanRegion + Send + Sync>;

/// Centered square covering two-thirds of the smaller frame dimension,
/// scaled to a `downscaled_size` square bitmap.
pub fn default_scan_region(frame_width: u32, frame_height: u32, downscaled_size: u32) -> ScanRegion {
    let smallest = frame_width.min(frame_height);
    let size = (2.0 / 3.0 * smallest as f64).round() as u32;
    ScanRegion {
        x: ((frame_width - size) as f64 / 2.0).round() as u32,
        y: ((frame_height - size) as f64 / 2.0).round() as u32,
        width: size,
        height: size,
        downscaled_width: downscaled_size,
        downscaled_height: downscaled_size,
    }
}

/// Compute the region for a frame, applying `calculator` when given and
/// forcing the result inside the frame bounds.
pub fn calculate_scan_region(
    calculator: Option<&ScanRegionCalculator>,
    frame_width: u32,
    frame_height: u32,
    downscaled_size: u32,
) -> ScanRegion {
    let region = match calculator {
        Some(calculate) => calculate(frame_width, frame_height),
        None => default_scan_region(frame_width, frame_height, downscaled_size),
    };
    region.clamped(frame_width, frame_height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_region_1080p() {
        let region = default_scan_region(1920, 1080, DEFAULT_CANVAS_SIZE);
        assert_eq!(region.width, 720);
        assert_eq!(region.height, 720);
        assert_eq!(region.x, 600);
        assert_eq!(region.y, 180);
        assert_eq!(region.downscaled_width, 400);
        assert!(region.fits_within(1920, 1080));
    }

    #[test]
    fn test_default_region_portrait_rounding() {
        let region = default_scan_region(481, 640, 300);
        // 2/3 * 481 = 320.67
        assert_eq!(region.width, 321);
        assert_eq!(region.x, 80);
        assert_eq!(region.y, 160);
        assert!(region.fits_within(481, 640));
    }

    #[test]
    fn test_bitmap_points_map_back_to_frame() {
        let region = default_scan_region(1920, 1080, DEFAULT_CANVAS_SIZE);
        let corner = region.to_frame_point(Point::new(400.0, 200.0));
        assert_eq!(corner, Point::new(1320.0, 540.0));
        assert_eq!(region.to_frame_point(Point::default()), Point::new(600.0, 180.0));
    }

    #[test]
    fn test_calculator_result_is_clamped() {
        let calculator: ScanRegionCalculator = Arc::new(|w, h| ScanRegion {
            x: w - 10,
            y: 0,
            width: 500,
            height: h * 2,
            downscaled_width: 0,
            downscaled_height: 64,
        });
        let region = calculate_scan_region(Some(&calculator), 640, 480, DEFAULT_CANVAS_SIZE);
        assert!(region.fits_within(640, 480));
        assert_eq!(region.width, 10);
        assert_eq!(region.height, 480);
        assert_eq!(region.downscaled_width, 1);
        assert_eq!(region.downscaled_height, 64);
    }
}
