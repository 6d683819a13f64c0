//! Canvas Sampler
//!
//! Copies a region of a frame into a reusable offscreen bitmap. Sampling is
//! nearest-neighbour: smoothing blurs module edges and costs decode rate.

use image::RgbaImage;

use super::region::ScanRegion;

/// Offscreen RGBA bitmap that frames are drawn into before decoding
#[derive(Debug, Clone)]
pub struct FrameCanvas {
    buffer: RgbaImage,
    /// Number of times the backing buffer was reallocated
    resize_count: u64,
}

impl FrameCanvas {
    /// Create an empty canvas; it takes its size from the first draw
    pub fn new() -> Self {
        Self {
            buffer: RgbaImage::new(0, 0),
            resize_count: 0,
        }
    }

    pub fn with_size(width: u32, height: u32) -> Self {
        Self {
            buffer: RgbaImage::new(width, height),
            resize_count: 0,
        }
    }

    pub fn width(&self) -> u32 {
        self.buffer.width()
    }

    pub fn height(&self) -> u32 {
        self.buffer.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.buffer.dimensions()
    }

    pub fn resize_count(&self) -> u64 {
        self.resize_count
    }

    /// The bitmap as last drawn
    pub fn image(&self) -> &RgbaImage {
        &self.buffer
    }

    /// Raw RGBA bytes for engines that want a flat pixel array
    pub fn image_data(&self) -> &[u8] {
        self.buffer.as_raw()
    }

    /// Draw `region` of `source` into the canvas and return the bitmap.
    ///
    /// Without a region the whole source is drawn at native size. The canvas
    /// is only reallocated when its size differs from the target size, or,
    /// with `disallow_resize`, when it has no pixels at all (it then takes
    /// the region size).
    pub fn draw(
        &mut self,
        source: &RgbaImage,
        region: Option<&ScanRegion>,
        disallow_resize: bool,
    ) -> &RgbaImage {
        let (source_width, source_height) = source.dimensions();
        let region = match region {
            Some(region) => region.clamped(source_width, source_height),
            None => ScanRegion::full_frame(source_width, source_height),
        };

        let (target_width, target_height) = if disallow_resize {
            if self.buffer.width() == 0 || self.buffer.height() == 0 {
                (region.width, region.height)
            } else {
                self.buffer.dimensions()
            }
        } else {
            (region.downscaled_width, region.downscaled_height)
        };

        if self.buffer.dimensions() != (target_width, target_height) {
            self.buffer = RgbaImage::new(target_width, target_height);
            self.resize_count += 1;
        }

        if source_width == 0 || source_height == 0 || target_width == 0 || target_height == 0 {
            return &self.buffer;
        }

        let src = source.as_raw();
        let src_stride = source_width as usize * 4;
        let dst_stride = target_width as usize * 4;
        let dst = &mut *self.buffer;

        let scale_x = region.width as f64 / target_width as f64;
        let scale_y = region.height as f64 / target_height as f64;
        let max_x = region.x + region.width - 1;
        let max_y = region.y + region.height - 1;

        for dy in 0..target_height {
            let sy = (region.y + ((dy as f64 + 0.5) * scale_y) as u32).min(max_y);
            let src_row = sy as usize * src_stride;
            let dst_row = dy as usize * dst_stride;
            for dx in 0..target_width {
                let sx = (region.x + ((dx as f64 + 0.5) * scale_x) as u32).min(max_x);
                let s = src_row + sx as usize * 4;
                let d = dst_row + dx as usize * 4;
                dst[d..d + 4].copy_from_slice(&src[s..s + 4]);
            }
        }

        &self.buffer
    }
}

impl Default for FrameCanvas {
    fn default() -> Self {
        Self::new()
    }
}
