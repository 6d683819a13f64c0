//! Shared fakes for unit tests

use futures::future::BoxFuture;
use image::RgbaImage;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::engine::{DetectedBarcode, DetectorFault, NativeDetector, QR_CODE_FORMAT};
use crate::media::Point;

/// Scripted outcome of one `detect` call: payload, nothing, or a fault
pub type Step = Result<Option<String>, DetectorFault>;

/// Native detector that replays a fixed script, then reports nothing found
pub struct ScriptedDetector {
    formats: Vec<String>,
    script: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    sizes: Mutex<Vec<(u32, u32)>>,
    /// Wall-clock time every `detect` call blocks for
    delay: Option<Duration>,
}

impl ScriptedDetector {
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            formats: vec![QR_CODE_FORMAT.to_string()],
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            sizes: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn with_formats(mut self, formats: &[&str]) -> Self {
        self.formats = formats.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Dimensions of every bitmap handed to `detect`
    pub fn bitmap_sizes(&self) -> Vec<(u32, u32)> {
        self.sizes.lock().clone()
    }
}

impl NativeDetector for ScriptedDetector {
    fn supported_formats(&self) -> BoxFuture<'_, anyhow::Result<Vec<String>>> {
        Box::pin(async move { Ok(self.formats.clone()) })
    }

    fn detect(&self, bitmap: &RgbaImage) -> Result<Vec<DetectedBarcode>, DetectorFault> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sizes.lock().push(bitmap.dimensions());
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let step = self.script.lock().pop_front().unwrap_or(Ok(None));
        step.map(|payload| {
            payload
                .map(|raw_value| DetectedBarcode {
                    raw_value,
                    format: QR_CODE_FORMAT.to_string(),
                    corner_points: vec![
                        Point::new(0.0, 0.0),
                        Point::new(bitmap.width() as f32, 0.0),
                        Point::new(bitmap.width() as f32, bitmap.height() as f32),
                        Point::new(0.0, bitmap.height() as f32),
                    ],
                })
                .into_iter()
                .collect()
        })
    }
}
