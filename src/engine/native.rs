//! Native Detector Engine
//!
//! In-process platform barcode detector. Detection calls are blocking and run
//! on tokio's blocking pool.

use futures::future::BoxFuture;
use image::RgbaImage;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::error::{Result, ScanError};
use crate::media::{Point, ScanResult};

/// Format name a detector must report to be used for QR scanning
pub const QR_CODE_FORMAT: &str = "qr_code";

/// A barcode found by a native detector
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedBarcode {
    pub raw_value: String,
    pub format: String,
    pub corner_points: Vec<Point>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DetectorFault {
    /// The detector service crashed; the detector instance is unusable
    #[error("service unavailable")]
    ServiceUnavailable,
    #[error("{0}")]
    Other(String),
}

/// Platform barcode detection capability
pub trait NativeDetector: Send + Sync + 'static {
    /// Symbologies the platform can detect, e.g. `["qr_code", "ean_13"]`
    fn supported_formats(&self) -> BoxFuture<'_, anyhow::Result<Vec<String>>>;

    /// Detect barcodes in an RGBA bitmap
    fn detect(&self, bitmap: &RgbaImage) -> std::result::Result<Vec<DetectedBarcode>, DetectorFault>;
}

pub struct NativeEngine {
    detector: Arc<dyn NativeDetector>,
    timeout: Duration,
}

impl NativeEngine {
    pub fn new(detector: Arc<dyn NativeDetector>, timeout: Duration) -> Self {
        Self { detector, timeout }
    }

    /// Whether `detector` reports QR support. Probe failures count as no.
    pub async fn supports_qr(detector: &dyn NativeDetector) -> bool {
        match detector.supported_formats().await {
            Ok(formats) => formats.iter().any(|f| f == QR_CODE_FORMAT),
            Err(e) => {
                log::warn!("Native detector capability probe failed: {}", e);
                false
            }
        }
    }

    pub async fn submit(&self, bitmap: RgbaImage) -> Result<ScanResult> {
        let detector = self.detector.clone();
        let task = tokio::task::spawn_blocking(move || detector.detect(&bitmap));

        let detected = match tokio::time::timeout(self.timeout, task).await {
            Err(_) => return Err(ScanError::Engine("timeout".to_string())),
            Ok(Err(join_error)) => {
                return Err(ScanError::Engine(format!("detector task failed: {}", join_error)))
            }
            Ok(Ok(Err(DetectorFault::ServiceUnavailable))) => {
                return Err(ScanError::EngineUnavailable)
            }
            Ok(Ok(Err(DetectorFault::Other(message)))) => return Err(ScanError::Engine(message)),
            Ok(Ok(Ok(detected))) => detected,
        };

        detected
            .into_iter()
            .find(|barcode| barcode.format == QR_CODE_FORMAT)
            .map(|barcode| ScanResult::new(barcode.raw_value).with_corner_points(barcode.corner_points))
            .ok_or(ScanError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedDetector;

    #[tokio::test]
    async fn test_probe_requires_qr_format() {
        let qr = ScriptedDetector::new(vec![]);
        assert!(NativeEngine::supports_qr(&qr).await);

        let ean_only = ScriptedDetector::new(vec![]).with_formats(&["ean_13"]);
        assert!(!NativeEngine::supports_qr(&ean_only).await);
    }

    #[tokio::test]
    async fn test_fault_mapping() {
        let detector = Arc::new(ScriptedDetector::new(vec![
            Err(DetectorFault::ServiceUnavailable),
            Err(DetectorFault::Other("bad frame".to_string())),
            Ok(None),
            Ok(Some("payload".to_string())),
        ]));
        let engine = NativeEngine::new(detector, Duration::from_secs(10));
        let bitmap = RgbaImage::new(4, 4);

        assert_eq!(engine.submit(bitmap.clone()).await, Err(ScanError::EngineUnavailable));
        assert_eq!(
            engine.submit(bitmap.clone()).await,
            Err(ScanError::Engine("bad frame".to_string()))
        );
        assert_eq!(engine.submit(bitmap.clone()).await, Err(ScanError::NotFound));
        assert_eq!(engine.submit(bitmap).await.unwrap().data, "payload");
    }
}
