//! One-shot decode of a still image or the current video frame

use image::{DynamicImage, RgbaImage};
use log::debug;
use std::borrow::Cow;
use std::path::Path;

use crate::engine::{EngineConfig, EngineHandle};
use crate::error::{Result, ScanError};
use crate::media::{FrameCanvas, ScanRegion, ScanResult, VideoFrame, VideoSource};

/// Anything [`scan_image`] can read pixels from
pub enum ImageSource<'a> {
    Frame(&'a VideoFrame),
    Rgba(&'a RgbaImage),
    Dynamic(&'a DynamicImage),
    /// The latest frame of a video source
    Video(&'a VideoSource),
    /// An encoded image file
    Path(&'a Path),
    /// Encoded image bytes (PNG, JPEG, WebP)
    Bytes(&'a [u8]),
}

#[derive(Default)]
pub struct ScanImageOptions<'a> {
    /// Region to sample; the whole image at native size when unset
    pub scan_region: Option<ScanRegion>,
    /// Engine to decode with. Created and closed internally when unset;
    /// a caller-supplied engine is left open.
    pub engine: Option<&'a EngineHandle>,
    /// Bitmap to draw into, reused across calls
    pub canvas: Option<&'a mut FrameCanvas>,
    pub disallow_canvas_resizing: bool,
    /// Retry on the whole image when the region yields nothing
    pub also_try_without_scan_region: bool,
}

/// Decode a QR code from `source`.
///
/// Corner points of the result are in source-image coordinates.
pub async fn scan_image(source: ImageSource<'_>, options: ScanImageOptions<'_>) -> Result<ScanResult> {
    let image = load_image(source).await?;
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(ScanError::UnsupportedInput("image has no pixels".to_string()));
    }

    let mut owned_engine = None;
    let engine: &EngineHandle = match options.engine {
        Some(engine) => engine,
        None => owned_engine.insert(EngineHandle::create(&EngineConfig::default()).await?),
    };

    let mut scratch = FrameCanvas::new();
    let canvas = match options.canvas {
        Some(canvas) => canvas,
        None => &mut scratch,
    };
    let disallow_resize = options.disallow_canvas_resizing;

    let region = options
        .scan_region
        .map(|region| region.clamped(width, height))
        .unwrap_or_else(|| ScanRegion::full_frame(width, height));

    let mut outcome = decode_region(engine, &image, &region, canvas, disallow_resize).await;

    if outcome.is_err() && options.also_try_without_scan_region && options.scan_region.is_some() {
        debug!("Nothing in scan region, retrying on the full {}x{} image", width, height);
        let full = ScanRegion::full_frame(width, height);
        outcome = decode_region(engine, &image, &full, canvas, disallow_resize).await;
    }

    if let Some(engine) = owned_engine {
        engine.close();
    }
    outcome
}

async fn decode_region(
    engine: &EngineHandle,
    image: &RgbaImage,
    region: &ScanRegion,
    canvas: &mut FrameCanvas,
    disallow_resize: bool,
) -> Result<ScanResult> {
    let bitmap = canvas.draw(image, Some(region), disallow_resize).clone();
    let mut result = engine.submit(bitmap).await?;

    // The canvas keeps its own size when resizing is disallowed
    let drawn = ScanRegion {
        downscaled_width: canvas.width(),
        downscaled_height: canvas.height(),
        ..*region
    };
    result.corner_points = result
        .corner_points
        .into_iter()
        .map(|point| drawn.to_frame_point(point))
        .collect();
    Ok(result)
}

async fn load_image(source: ImageSource<'_>) -> Result<Cow<'_, RgbaImage>> {
    match source {
        ImageSource::Frame(frame) => Ok(Cow::Borrowed(frame.image.as_ref())),
        ImageSource::Rgba(image) => Ok(Cow::Borrowed(image)),
        ImageSource::Dynamic(image) => Ok(Cow::Owned(image.to_rgba8())),
        ImageSource::Video(video) => video
            .current_frame()
            .map(|frame| Cow::Owned(frame.image.as_ref().clone()))
            .ok_or_else(|| ScanError::UnsupportedInput("video source has no frame".to_string())),
        ImageSource::Path(path) => {
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|e| ScanError::UnsupportedInput(format!("{}: {}", path.display(), e)))?;
            decode_bytes(&bytes).map(Cow::Owned)
        }
        ImageSource::Bytes(bytes) => decode_bytes(bytes).map(Cow::Owned),
    }
}

fn decode_bytes(bytes: &[u8]) -> Result<RgbaImage> {
    image::load_from_memory(bytes)
        .map(|image| image.to_rgba8())
        .map_err(|e| ScanError::UnsupportedInput(e.to_string()))
}
