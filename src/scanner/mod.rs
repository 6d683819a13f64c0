//! QR Scanner
//!
//! Ties the camera session, the video source, the decode engine and the host
//! visibility signal together into a continuously scanning `QrScanner`.
//!
//! State lives in a small synchronous section (`active`, `paused`, flash,
//! loop generation) that is never held across an await. Camera acquisition is
//! serialized through the camera session's async mutex. The engine slot is
//! locked only to read, create or replace the handle, never across a decode.

use log::{debug, info, warn};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

pub mod scan_loop;
pub mod visibility;

pub use visibility::{Visibility, VisibilityAction, VisibilitySignal};

use crate::camera::session::{apply_torch, stream_has_torch};
use crate::camera::{CameraBackend, CameraPreference, CameraSession, FacingMode};
use crate::config::{GrayscaleWeights, InversionMode, ScannerSettings};
use crate::engine::{EngineConfig, EngineFactory, EngineHandle, NativeDetector};
use crate::error::{Result, ScanError};
use crate::media::{ScanRegion, ScanRegionCalculator, ScanResult, VideoSource};
use crate::util::DeferredTask;

/// How long a non-immediate pause waits before releasing the camera
pub const PAUSE_TEARDOWN_DELAY: Duration = Duration::from_millis(300);

/// Called with every successful decode
pub type DecodeHandler = Arc<dyn Fn(ScanResult) + Send + Sync>;

/// Called with every failed scan cycle, including `NotFound`
pub type DecodeErrorHandler = Arc<dyn Fn(&ScanError) + Send + Sync>;

struct ScannerState {
    /// Scanning has been requested
    active: bool,
    /// The stream may be torn down
    paused: bool,
    destroyed: bool,
    /// Requested torch state; reapplied when a stream starts
    flash_on: bool,
    teardown: Option<DeferredTask>,
    loop_generation: u64,
    loop_task: Option<JoinHandle<()>>,
    scan_region: Option<ScanRegion>,
}

struct EngineKnobs {
    grayscale_weights: GrayscaleWeights,
    inversion_mode: InversionMode,
}

struct Inner {
    state: Mutex<ScannerState>,
    camera: tokio::sync::Mutex<CameraSession>,
    video: VideoSource,
    engine: tokio::sync::Mutex<Option<EngineHandle>>,
    engine_factory: EngineFactory,
    knobs: Mutex<EngineKnobs>,
    on_decode: DecodeHandler,
    on_decode_error: DecodeErrorHandler,
    scan_region_calculator: Option<ScanRegionCalculator>,
    downscaled_size: u32,
    min_scan_interval: Duration,
    visibility: watch::Receiver<Visibility>,
    visibility_task: Mutex<Option<JoinHandle<()>>>,
}

enum PauseOutcome {
    Done(bool),
    Deferred(oneshot::Receiver<bool>),
}

impl Inner {
    fn is_visible(&self) -> bool {
        *self.visibility.borrow() == Visibility::Visible
    }

    /// Whether the loop of `generation` may run another cycle
    fn loop_is_current(&self, generation: u64) -> bool {
        let state = self.state.lock();
        state.active && !state.paused && !state.destroyed && state.loop_generation == generation
    }

    fn should_stream(&self) -> bool {
        let state = self.state.lock();
        state.active && !state.paused && !state.destroyed
    }

    fn begin_pause(self: &Arc<Self>, immediate: bool) -> PauseOutcome {
        let mut state = self.state.lock();
        state.paused = true;
        if !state.active {
            return PauseOutcome::Done(true);
        }
        self.video.pause();

        if immediate {
            state.teardown = None;
            drop(state);
            self.release_stream();
            return PauseOutcome::Done(true);
        }

        let weak = Arc::downgrade(self);
        let (task, done) = DeferredTask::schedule(PAUSE_TEARDOWN_DELAY, async move {
            match weak.upgrade() {
                Some(inner) => inner.teardown_if_paused(),
                None => false,
            }
        });
        // Replacing the previous task cancels its teardown
        state.teardown = Some(task);
        PauseOutcome::Deferred(done)
    }

    fn teardown_if_paused(&self) -> bool {
        if !self.state.lock().paused {
            return false;
        }
        self.release_stream();
        true
    }

    fn release_stream(&self) {
        if let Some(stream) = self.video.detach() {
            info!("Stopping camera stream {}", stream.id());
            stream.stop();
        }
    }

    fn spawn_scan_loop(self: &Arc<Self>) {
        let Some(frames) = self.video.subscribe() else {
            return;
        };
        let mut state = self.state.lock();
        state.loop_generation += 1;
        let generation = state.loop_generation;
        if let Some(previous) = state.loop_task.take() {
            previous.abort();
        }
        state.loop_task = Some(tokio::spawn(scan_loop::run(
            Arc::downgrade(self),
            generation,
            frames,
        )));
    }

    /// Create an engine through the factory and apply the current knobs
    async fn create_engine(&self) -> Result<EngineHandle> {
        let engine = (self.engine_factory)().await?;
        let knobs = self.knobs.lock();
        engine.set_grayscale_weights(knobs.grayscale_weights);
        engine.set_inversion_mode(knobs.inversion_mode);
        Ok(engine)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self.visibility_task.get_mut().take() {
            task.abort();
        }
        if let Some(task) = self.state.get_mut().loop_task.take() {
            task.abort();
        }
        self.release_stream();
        if let Some(engine) = self.engine.get_mut().take() {
            engine.close();
        }
    }
}

/// Continuous QR scanner over a camera stream.
///
/// Clones share one scanner. Must be built inside a tokio runtime.
#[derive(Clone)]
pub struct QrScanner {
    inner: Arc<Inner>,
}

impl QrScanner {
    pub fn builder() -> ScannerBuilder {
        ScannerBuilder::new()
    }

    /// Start scanning.
    ///
    /// No-op when already scanning or destroyed. While the host is hidden the
    /// request is recorded and the camera is opened once it becomes visible.
    /// On failure `active` is rolled back and the error returned.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        {
            let mut state = inner.state.lock();
            if state.destroyed || (state.active && !state.paused) {
                return Ok(());
            }
            state.active = true;
            if !inner.is_visible() {
                debug!("Host hidden, deferring camera start");
                state.paused = true;
                return Ok(());
            }
            state.paused = false;
            state.teardown = None;
        }

        if inner.video.play() {
            debug!("Resuming attached stream");
            inner.spawn_scan_loop();
            self.apply_pending_flash().await;
            return Ok(());
        }

        let mut camera = inner.camera.lock().await;
        if !inner.should_stream() {
            return Ok(());
        }
        if inner.video.play() {
            drop(camera);
            inner.spawn_scan_loop();
            self.apply_pending_flash().await;
            return Ok(());
        }

        let acquired = match camera.start().await {
            Ok(acquired) => acquired,
            Err(e) => {
                let mut state = inner.state.lock();
                if state.paused {
                    return Ok(());
                }
                state.active = false;
                warn!("Failed to start camera: {}", e);
                return Err(e);
            }
        };
        drop(camera);

        if !inner.should_stream() {
            debug!("Scanner stopped during camera start, releasing stream");
            acquired.stream.stop();
            return Ok(());
        }

        inner
            .video
            .set_mirrored(acquired.facing_mode == FacingMode::User);
        if let Some(previous) = inner.video.attach(acquired.stream) {
            previous.stop();
        }
        inner.video.play();
        inner.spawn_scan_loop();
        self.apply_pending_flash().await;

        Ok(())
    }

    /// Apply a flash request recorded while the stream was not running
    async fn apply_pending_flash(&self) {
        let pending = std::mem::take(&mut self.inner.state.lock().flash_on);
        if pending {
            if let Err(e) = self.turn_flash_on().await {
                warn!("Could not restore flash: {}", e);
            }
        }
    }

    /// Stop scanning and release the camera immediately
    pub fn stop(&self) {
        drop(self.pause(true));
        let mut state = self.inner.state.lock();
        state.active = false;
        if let Some(task) = state.loop_task.take() {
            task.abort();
        }
    }

    /// Pause scanning.
    ///
    /// The video source pauses at once. The stream is released immediately
    /// when `immediate`, otherwise after [`PAUSE_TEARDOWN_DELAY`] if no
    /// `start()` or later `pause()` intervened. The returned future resolves to
    /// whether this call released the stream; dropping it does not cancel the
    /// pause.
    pub fn pause(&self, immediate: bool) -> impl Future<Output = bool> + Send + 'static {
        let outcome = self.inner.begin_pause(immediate);
        async move {
            match outcome {
                PauseOutcome::Done(released) => released,
                PauseOutcome::Deferred(done) => done.await.unwrap_or(false),
            }
        }
    }

    /// Stop scanning and release the camera, the engine and the visibility
    /// listener. Later calls do nothing.
    pub async fn destroy(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
        }
        if let Some(task) = self.inner.visibility_task.lock().take() {
            task.abort();
        }
        self.stop();
        if let Some(engine) = self.inner.engine.lock().await.take() {
            engine.close();
        }
        info!("Scanner destroyed");
    }

    /// Select another camera, restarting the stream when scanning
    pub async fn set_camera(&self, preference: CameraPreference) -> Result<()> {
        {
            let mut camera = self.inner.camera.lock().await;
            if !camera.set_preferred_camera(preference) {
                return Ok(());
            }
            info!("Switching camera to {}", camera.preferred_camera());
        }
        self.restart_video_stream().await
    }

    /// Alias of [`set_camera`](Self::set_camera)
    pub async fn switch_camera(&self, preference: CameraPreference) -> Result<()> {
        self.set_camera(preference).await
    }

    pub async fn preferred_camera(&self) -> CameraPreference {
        self.inner.camera.lock().await.preferred_camera().clone()
    }

    async fn restart_video_stream(&self) -> Result<()> {
        let was_paused = self.is_paused();
        let released = self.pause(true).await;
        if !released || was_paused || !self.is_active() {
            return Ok(());
        }
        self.start().await
    }

    /// Whether the current (or preferred) camera has a torch
    pub async fn has_flash(&self) -> bool {
        if let Some(stream) = self.inner.video.stream() {
            return stream_has_torch(stream.as_ref());
        }
        self.inner.camera.lock().await.has_flash().await
    }

    pub fn is_flash_on(&self) -> bool {
        self.inner.state.lock().flash_on
    }

    pub async fn set_flash(&self, on: bool) -> Result<()> {
        if on {
            self.turn_flash_on().await
        } else {
            self.turn_flash_off().await
        }
    }

    pub async fn toggle_flash(&self) -> Result<()> {
        self.set_flash(!self.is_flash_on()).await
    }

    /// Turn the torch on, or remember the request until the stream starts
    pub async fn turn_flash_on(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if state.flash_on || state.destroyed {
                return Ok(());
            }
            state.flash_on = true;
            if !state.active || state.paused {
                debug!("Flash requested while not streaming, applying on start");
                return Ok(());
            }
        }

        let applied = match self.inner.video.stream() {
            Some(stream) => apply_torch(stream.as_ref(), true).await,
            None => Err(ScanError::NoFlashAvailable),
        };
        if applied.is_err() {
            self.inner.state.lock().flash_on = false;
        }
        applied
    }

    /// Turn the torch off by restarting the stream
    pub async fn turn_flash_off(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if !state.flash_on {
                return Ok(());
            }
            state.flash_on = false;
        }
        self.restart_video_stream().await
    }

    /// Change the polarity the worker engine searches for
    pub async fn set_inversion_mode(&self, mode: InversionMode) {
        self.inner.knobs.lock().inversion_mode = mode;
        if let Some(engine) = self.inner.engine.lock().await.as_ref() {
            engine.set_inversion_mode(mode);
        }
    }

    pub async fn set_grayscale_weights(&self, weights: GrayscaleWeights) {
        self.inner.knobs.lock().grayscale_weights = weights;
        if let Some(engine) = self.inner.engine.lock().await.as_ref() {
            engine.set_grayscale_weights(weights);
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.state.lock().active
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state.lock().paused
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.state.lock().destroyed
    }

    /// Region sampled from the current stream, once its resolution is known
    pub fn scan_region(&self) -> Option<ScanRegion> {
        self.inner.state.lock().scan_region
    }

    /// The video source the scanner samples, e.g. for a preview or a
    /// one-shot [`scan_image`](crate::scan_image)
    pub fn video(&self) -> &VideoSource {
        &self.inner.video
    }

    fn spawn_visibility_listener(inner: &Arc<Inner>) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(inner);
        let mut visibility = inner.visibility.clone();
        tokio::spawn(async move {
            while visibility.changed().await.is_ok() {
                let current = *visibility.borrow_and_update();
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let scanner = QrScanner { inner };
                match visibility::transition(current, scanner.is_active()) {
                    VisibilityAction::Pause => {
                        debug!("Host hidden, pausing");
                        drop(scanner.pause(false));
                    }
                    VisibilityAction::Resume => {
                        debug!("Host visible, resuming");
                        if let Err(e) = scanner.start().await {
                            warn!("Resume after visibility change failed: {}", e);
                        }
                    }
                    VisibilityAction::Nothing => {}
                }
            }
        })
    }
}

/// Builder for [`QrScanner`]
pub struct ScannerBuilder {
    backend: Option<Arc<dyn CameraBackend>>,
    settings: ScannerSettings,
    on_decode: Option<DecodeHandler>,
    on_decode_error: Option<DecodeErrorHandler>,
    scan_region_calculator: Option<ScanRegionCalculator>,
    native_detector: Option<Arc<dyn NativeDetector>>,
    engine_factory: Option<EngineFactory>,
    visibility: Option<watch::Receiver<Visibility>>,
}

impl ScannerBuilder {
    pub fn new() -> Self {
        Self {
            backend: None,
            settings: ScannerSettings::default(),
            on_decode: None,
            on_decode_error: None,
            scan_region_calculator: None,
            native_detector: None,
            engine_factory: None,
            visibility: None,
        }
    }

    pub fn backend(mut self, backend: Arc<dyn CameraBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn settings(mut self, settings: ScannerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn preferred_camera(mut self, preference: CameraPreference) -> Self {
        self.settings.preferred_camera = preference;
        self
    }

    pub fn max_scans_per_second(mut self, max: u32) -> Self {
        self.settings.max_scans_per_second = max;
        self
    }

    pub fn on_decode<F>(mut self, handler: F) -> Self
    where
        F: Fn(ScanResult) + Send + Sync + 'static,
    {
        self.on_decode = Some(Arc::new(handler));
        self
    }

    /// Defaults to logging everything except `NotFound`
    pub fn on_decode_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ScanError) + Send + Sync + 'static,
    {
        self.on_decode_error = Some(Arc::new(handler));
        self
    }

    pub fn scan_region_calculator(mut self, calculator: ScanRegionCalculator) -> Self {
        self.scan_region_calculator = Some(calculator);
        self
    }

    /// Platform detector to use when it supports QR codes
    pub fn native_detector(mut self, detector: Arc<dyn NativeDetector>) -> Self {
        self.native_detector = Some(detector);
        self
    }

    /// Replace the engine creation entirely
    pub fn engine_factory(mut self, factory: EngineFactory) -> Self {
        self.engine_factory = Some(factory);
        self
    }

    pub fn visibility(mut self, visibility: watch::Receiver<Visibility>) -> Self {
        self.visibility = Some(visibility);
        self
    }

    /// Build the scanner and request its decode engine in the background
    pub fn build(self) -> QrScanner {
        let settings = self.settings;
        let engine_factory = self.engine_factory.unwrap_or_else(|| {
            EngineConfig {
                native_detector: self.native_detector,
                grayscale_weights: settings.grayscale_weights,
                inversion_mode: settings.inversion_mode,
                ..Default::default()
            }
            .into_factory()
        });
        let visibility = self
            .visibility
            .unwrap_or_else(|| watch::channel(Visibility::Visible).1);

        let inner = Arc::new(Inner {
            state: Mutex::new(ScannerState {
                active: false,
                paused: false,
                destroyed: false,
                flash_on: false,
                teardown: None,
                loop_generation: 0,
                loop_task: None,
                scan_region: None,
            }),
            camera: tokio::sync::Mutex::new(CameraSession::new(
                self.backend,
                settings.preferred_camera.clone(),
            )),
            video: VideoSource::new(),
            engine: tokio::sync::Mutex::new(None),
            engine_factory,
            knobs: Mutex::new(EngineKnobs {
                grayscale_weights: settings.grayscale_weights,
                inversion_mode: settings.inversion_mode,
            }),
            on_decode: self.on_decode.unwrap_or_else(|| {
                Arc::new(|result: ScanResult| info!("Decoded: {}", result.data))
            }),
            on_decode_error: self.on_decode_error.unwrap_or_else(|| {
                Arc::new(|e: &ScanError| {
                    if !e.is_not_found() {
                        warn!("{}", e);
                    }
                })
            }),
            scan_region_calculator: self.scan_region_calculator,
            downscaled_size: settings.downscaled_size.max(1),
            min_scan_interval: settings.min_scan_interval(),
            visibility,
            visibility_task: Mutex::new(None),
        });

        let listener = QrScanner::spawn_visibility_listener(&inner);
        *inner.visibility_task.lock() = Some(listener);

        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let mut slot = inner.engine.lock().await;
            if slot.is_none() {
                match inner.create_engine().await {
                    Ok(engine) => {
                        debug!("Decode engine ready: {:?}", engine);
                        *slot = Some(engine);
                    }
                    Err(e) => warn!("Decode engine creation failed: {}", e),
                }
            }
        });

        QrScanner { inner }
    }
}

impl Default for ScannerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests;
