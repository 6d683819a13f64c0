//! Frame Source Adapter
//!
//! `VideoSource` plays the part of a video element: it holds the attached
//! camera stream, knows whether playback is paused or mirrored and exposes the
//! latest frame with its dimensions.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

use super::VideoFrame;
use crate::camera::CameraStream;

/// How much of the stream is available for sampling
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    /// No stream attached
    HaveNothing,
    /// Stream attached but no frame received yet
    HaveMetadata,
    /// At least one renderable frame is buffered
    HaveCurrentData,
}

struct SourceState {
    stream: Option<Arc<dyn CameraStream>>,
    frames: Option<watch::Receiver<Option<VideoFrame>>>,
    paused: bool,
    mirrored: bool,
}

pub struct VideoSource {
    state: Mutex<SourceState>,
}

impl VideoSource {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SourceState {
                stream: None,
                frames: None,
                paused: true,
                mirrored: false,
            }),
        }
    }

    /// Attach a stream, returning the previously attached one.
    /// The caller owns stopping the returned stream.
    pub fn attach(&self, stream: Arc<dyn CameraStream>) -> Option<Arc<dyn CameraStream>> {
        let mut state = self.state.lock();
        state.frames = Some(stream.frames());
        state.stream.replace(stream)
    }

    /// Detach the current stream without stopping it
    pub fn detach(&self) -> Option<Arc<dyn CameraStream>> {
        let mut state = self.state.lock();
        state.frames = None;
        state.stream.take()
    }

    pub fn stream(&self) -> Option<Arc<dyn CameraStream>> {
        self.state.lock().stream.clone()
    }

    pub fn has_stream(&self) -> bool {
        self.state.lock().stream.is_some()
    }

    /// Resume playback. Returns false when there is nothing to play.
    pub fn play(&self) -> bool {
        let mut state = self.state.lock();
        if state.stream.is_none() {
            return false;
        }
        state.paused = false;
        true
    }

    pub fn pause(&self) {
        self.state.lock().paused = true;
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Mirror the preview horizontally (user-facing cameras)
    pub fn set_mirrored(&self, mirrored: bool) {
        self.state.lock().mirrored = mirrored;
    }

    pub fn is_mirrored(&self) -> bool {
        self.state.lock().mirrored
    }

    /// Latest frame delivered by the attached stream
    pub fn current_frame(&self) -> Option<VideoFrame> {
        let state = self.state.lock();
        state.frames.as_ref().and_then(|rx| rx.borrow().clone())
    }

    /// Native resolution of the latest frame
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        let state = self.state.lock();
        state
            .frames
            .as_ref()
            .and_then(|rx| rx.borrow().as_ref().map(|f| (f.width, f.height)))
    }

    pub fn ready_state(&self) -> ReadyState {
        let state = self.state.lock();
        match &state.frames {
            None => ReadyState::HaveNothing,
            Some(rx) if rx.borrow().is_some() => ReadyState::HaveCurrentData,
            Some(_) => ReadyState::HaveMetadata,
        }
    }

    /// Playing and holding a renderable frame
    pub fn is_ready(&self) -> bool {
        !self.is_paused() && self.ready_state() == ReadyState::HaveCurrentData
    }

    /// Frame notifications for the attached stream.
    /// `changed()` on the returned receiver resolves once per delivered frame.
    pub fn subscribe(&self) -> Option<watch::Receiver<Option<VideoFrame>>> {
        self.state.lock().frames.clone()
    }
}

impl Default for VideoSource {
    fn default() -> Self {
        Self::new()
    }
}
