//! QR Scanner
//!
//! Continuous QR code scanning over a camera stream, plus one-shot decoding of
//! still images. Decoding runs on a dedicated worker thread, or on a platform
//! barcode detector when one is available.

pub mod camera;
pub mod config;
pub mod engine;
pub mod error;
pub mod media;
pub mod scan_image;
pub mod scanner;
pub mod util;

#[cfg(test)]
mod test_support;

pub use camera::{has_camera, list_cameras, Camera, CameraBackend, CameraPreference, FacingMode};
pub use config::{GrayscaleWeights, InversionMode, ScannerSettings};
pub use engine::{EngineConfig, EngineHandle, EngineKind};
pub use error::{Result, ScanError};
pub use media::{Point, ScanRegion, ScanResult, VideoFrame, VideoSource};
pub use scan_image::{scan_image, ImageSource, ScanImageOptions};
pub use scanner::{QrScanner, ScannerBuilder, Visibility, VisibilitySignal};
