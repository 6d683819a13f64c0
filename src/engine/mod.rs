//! Decode Engines
//!
//! One contract over two backends: a worker thread running the bundled codec,
//! or an in-process native detector. The backend is picked once, when the
//! handle is created, by probing the native detector's capabilities.

use futures::future::BoxFuture;
use image::RgbaImage;
use log::{debug, info};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub mod codec;
pub mod native;
pub mod worker;

pub use codec::{RqrrDecoder, SymbolDecoder};
pub use native::{DetectedBarcode, DetectorFault, NativeDetector, NativeEngine, QR_CODE_FORMAT};
pub use worker::WorkerEngine;

use crate::config::{GrayscaleWeights, InversionMode};
use crate::error::Result;
use crate::media::ScanResult;

/// Deadline for a single decode round-trip
pub const DECODE_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds the codec for a new worker thread
pub type DecoderFactory = Arc<dyn Fn() -> Box<dyn SymbolDecoder> + Send + Sync>;

/// Creates engine handles for a scanner (initially and after a crash)
pub type EngineFactory = Arc<dyn Fn() -> BoxFuture<'static, Result<EngineHandle>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Worker,
    Native,
}

/// Inputs for [`EngineHandle::create`]
#[derive(Clone)]
pub struct EngineConfig {
    /// Used when it reports `qr_code` support
    pub native_detector: Option<Arc<dyn NativeDetector>>,
    /// Codec for the worker backend; `RqrrDecoder` when unset
    pub decoder_factory: Option<DecoderFactory>,
    pub grayscale_weights: GrayscaleWeights,
    pub inversion_mode: InversionMode,
    pub timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            native_detector: None,
            decoder_factory: None,
            grayscale_weights: GrayscaleWeights::default(),
            inversion_mode: InversionMode::Original,
            timeout: DECODE_TIMEOUT,
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("native_detector", &self.native_detector.is_some())
            .field("decoder_factory", &self.decoder_factory.is_some())
            .field("grayscale_weights", &self.grayscale_weights)
            .field("inversion_mode", &self.inversion_mode)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl EngineConfig {
    /// Factory that creates a fresh handle from this config on every call
    pub fn into_factory(self) -> EngineFactory {
        Arc::new(move || -> BoxFuture<'static, Result<EngineHandle>> {
            let config = self.clone();
            Box::pin(async move { EngineHandle::create(&config).await })
        })
    }
}

/// Handle to a decode engine. Clones share the same engine.
#[derive(Clone)]
pub enum EngineHandle {
    Worker(Arc<WorkerEngine>),
    Native(Arc<NativeEngine>),
}

impl EngineHandle {
    /// Probe for a native detector and create the matching engine
    pub async fn create(config: &EngineConfig) -> Result<Self> {
        if let Some(detector) = &config.native_detector {
            if NativeEngine::supports_qr(detector.as_ref()).await {
                info!("Using native barcode detector");
                return Ok(Self::native(detector.clone(), config.timeout));
            }
            debug!("Native detector lacks {} support, falling back to worker", QR_CODE_FORMAT);
        }

        let decoder = match &config.decoder_factory {
            Some(factory) => factory(),
            None => Box::new(RqrrDecoder::new()),
        };
        let worker = WorkerEngine::spawn(
            decoder,
            config.grayscale_weights,
            config.inversion_mode,
            config.timeout,
        )?;
        Ok(EngineHandle::Worker(Arc::new(worker)))
    }

    pub fn native(detector: Arc<dyn NativeDetector>, timeout: Duration) -> Self {
        EngineHandle::Native(Arc::new(NativeEngine::new(detector, timeout)))
    }

    pub fn kind(&self) -> EngineKind {
        match self {
            EngineHandle::Worker(_) => EngineKind::Worker,
            EngineHandle::Native(_) => EngineKind::Native,
        }
    }

    /// Decode a bitmap.
    ///
    /// Fails with `NotFound` when no symbol is present, `Engine` on a fault or
    /// timeout, and `EngineUnavailable` when this handle must be replaced.
    pub async fn submit(&self, bitmap: RgbaImage) -> Result<ScanResult> {
        match self {
            EngineHandle::Worker(worker) => worker.submit(bitmap).await,
            EngineHandle::Native(native) => native.submit(bitmap).await,
        }
    }

    /// Shut the engine down. No-op for native detectors.
    pub fn close(&self) {
        if let EngineHandle::Worker(worker) = self {
            worker.close();
        }
    }

    /// Worker only
    pub fn set_grayscale_weights(&self, weights: GrayscaleWeights) {
        if let EngineHandle::Worker(worker) = self {
            worker.set_grayscale_weights(weights);
        }
    }

    /// Worker only
    pub fn set_inversion_mode(&self, mode: InversionMode) {
        if let EngineHandle::Worker(worker) = self {
            worker.set_inversion_mode(mode);
        }
    }

    /// Whether both handles refer to the same engine instance
    pub fn same_engine(&self, other: &EngineHandle) -> bool {
        match (self, other) {
            (EngineHandle::Worker(a), EngineHandle::Worker(b)) => Arc::ptr_eq(a, b),
            (EngineHandle::Native(a), EngineHandle::Native(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EngineHandle::{:?}", self.kind())
    }
}
