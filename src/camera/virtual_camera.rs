//! Virtual Camera Backend
//!
//! Plays still images back as camera devices. Devices honour the same
//! constraints a hardware backend would (facing mode, device id, minimum
//! width) and can advertise a torch. Used by the `watch` command and tests.

use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use image::RgbaImage;
use log::{debug, info};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::{
    CameraBackend, CameraStream, Constrain, DeviceKind, FacingMode, MediaDeviceInfo,
    TrackCapabilities, VideoConstraints, VideoTrack,
};
use crate::media::VideoFrame;

const DEFAULT_FPS: u32 = 30;

/// A simulated camera device
#[derive(Debug, Clone)]
pub struct VirtualDevice {
    pub id: String,
    pub label: String,
    pub facing: Option<FacingMode>,
    pub torch: bool,
    pub fps: u32,
    frames: Vec<Arc<RgbaImage>>,
}

impl VirtualDevice {
    pub fn new(id: &str, label: &str) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            facing: None,
            torch: false,
            fps: DEFAULT_FPS,
            frames: Vec::new(),
        }
    }

    pub fn with_facing(mut self, facing: FacingMode) -> Self {
        self.facing = Some(facing);
        self
    }

    pub fn with_torch(mut self, torch: bool) -> Self {
        self.torch = torch;
        self
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps.max(1);
        self
    }

    /// Frames played in a loop while the stream is open
    pub fn with_frames(mut self, frames: Vec<RgbaImage>) -> Self {
        self.frames = frames.into_iter().map(Arc::new).collect();
        self
    }

    /// Capture width, taken from the first frame
    pub fn width(&self) -> u32 {
        self.frames.first().map(|f| f.width()).unwrap_or(0)
    }

    fn satisfies(&self, constraints: &VideoConstraints) -> bool {
        if let Some(min_width) = constraints.min_width {
            if self.width() < min_width {
                return false;
            }
        }
        if let Some(facing) = &constraints.facing_mode {
            if !facing.accepts(self.facing.as_ref()) {
                return false;
            }
        }
        if let Some(device_id) = &constraints.device_id {
            if !device_id.accepts(Some(&self.id)) {
                return false;
            }
        }
        true
    }

    fn ideal_score(&self, constraints: &VideoConstraints) -> u32 {
        let mut score = 0;
        if let Some(Constrain::Ideal(facing)) = &constraints.facing_mode {
            if self.facing == Some(*facing) {
                score += 1;
            }
        }
        if let Some(Constrain::Ideal(id)) = &constraints.device_id {
            if &self.id == id {
                score += 1;
            }
        }
        score
    }
}

/// Camera backend serving [`VirtualDevice`]s
pub struct VirtualCamera {
    devices: Vec<VirtualDevice>,
    /// Hide labels until a stream has been opened once, like browsers do
    labels_need_permission: bool,
    labels_unlocked: AtomicBool,
    enumeration_fails: AtomicBool,
    open_count: AtomicUsize,
    stream_counter: AtomicU64,
    /// Tracks not yet stopped; stopped ones are pruned on the next open
    live_tracks: Mutex<Vec<Arc<VirtualTrack>>>,
    last_track: Mutex<Option<Arc<VirtualTrack>>>,
    constraint_log: Mutex<Vec<VideoConstraints>>,
}

impl VirtualCamera {
    pub fn new(devices: Vec<VirtualDevice>) -> Self {
        Self {
            devices,
            labels_need_permission: false,
            labels_unlocked: AtomicBool::new(false),
            enumeration_fails: AtomicBool::new(false),
            open_count: AtomicUsize::new(0),
            stream_counter: AtomicU64::new(1),
            live_tracks: Mutex::new(Vec::new()),
            last_track: Mutex::new(None),
            constraint_log: Mutex::new(Vec::new()),
        }
    }

    pub fn with_labels_after_permission(mut self) -> Self {
        self.labels_need_permission = true;
        self
    }

    /// Make `enumerate_devices` fail
    pub fn set_enumeration_fails(&self, fails: bool) {
        self.enumeration_fails.store(fails, Ordering::SeqCst);
    }

    /// Number of successful `open` calls
    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }

    /// Every constraint set `open` was called with, in order
    pub fn constraint_log(&self) -> Vec<VideoConstraints> {
        self.constraint_log.lock().clone()
    }

    /// Streams whose tracks have not been stopped
    pub fn live_streams(&self) -> usize {
        self.live_tracks.lock().iter().filter(|t| t.is_live()).count()
    }

    /// Track of the most recently opened stream
    pub fn last_track(&self) -> Option<Arc<VirtualTrack>> {
        self.last_track.lock().clone()
    }

    fn open_device(&self, device: &VirtualDevice) -> Arc<VirtualStream> {
        let id = format!(
            "{}#{}",
            device.id,
            self.stream_counter.fetch_add(1, Ordering::Relaxed)
        );
        let track = Arc::new(VirtualTrack {
            label: device.label.clone(),
            torch_capable: device.torch,
            torch_on: AtomicBool::new(false),
            live: AtomicBool::new(true),
        });
        let (frame_tx, frame_rx) = watch::channel::<Option<VideoFrame>>(None);

        let frames = device.frames.clone();
        let period = Duration::from_secs_f64(1.0 / device.fps as f64);
        let feed_track = track.clone();
        let stream_id = id.clone();
        tokio::spawn(async move {
            if frames.is_empty() {
                return;
            }
            let mut interval = tokio::time::interval(period);
            let mut index = 0usize;
            loop {
                interval.tick().await;
                if !feed_track.is_live() {
                    break;
                }
                let frame = VideoFrame::new(frames[index % frames.len()].clone());
                index += 1;
                if frame_tx.send(Some(frame)).is_err() {
                    break;
                }
            }
            debug!("Virtual stream {} feed stopped after {} frames", stream_id, index);
        });

        {
            let mut live = self.live_tracks.lock();
            live.retain(|t| t.is_live());
            live.push(track.clone());
        }
        *self.last_track.lock() = Some(track.clone());

        Arc::new(VirtualStream {
            id,
            track,
            frames: frame_rx,
        })
    }
}

impl CameraBackend for VirtualCamera {
    fn enumerate_devices(&self) -> BoxFuture<'_, Result<Vec<MediaDeviceInfo>>> {
        Box::pin(async move {
            if self.enumeration_fails.load(Ordering::SeqCst) {
                return Err(anyhow!("device enumeration failed"));
            }
            let show_labels =
                !self.labels_need_permission || self.labels_unlocked.load(Ordering::SeqCst);
            Ok(self
                .devices
                .iter()
                .map(|d| MediaDeviceInfo {
                    device_id: d.id.clone(),
                    kind: DeviceKind::VideoInput,
                    label: if show_labels { d.label.clone() } else { String::new() },
                })
                .collect())
        })
    }

    fn open(&self, constraints: VideoConstraints) -> BoxFuture<'_, Result<Arc<dyn CameraStream>>> {
        Box::pin(async move {
            self.constraint_log.lock().push(constraints.clone());

            let device = self
                .devices
                .iter()
                .filter(|d| d.satisfies(&constraints))
                .rev()
                .max_by_key(|d| d.ideal_score(&constraints))
                .ok_or_else(|| anyhow!("OverconstrainedError: {:?}", constraints))?;

            let stream = self.open_device(device);
            self.open_count.fetch_add(1, Ordering::SeqCst);
            self.labels_unlocked.store(true, Ordering::SeqCst);
            info!("Opened virtual camera {} ({})", stream.id, device.label);
            Ok(stream as Arc<dyn CameraStream>)
        })
    }
}

pub struct VirtualTrack {
    label: String,
    torch_capable: bool,
    torch_on: AtomicBool,
    live: AtomicBool,
}

impl VirtualTrack {
    pub fn is_torch_on(&self) -> bool {
        self.torch_on.load(Ordering::SeqCst)
    }
}

impl VideoTrack for VirtualTrack {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn capabilities(&self) -> TrackCapabilities {
        TrackCapabilities {
            torch: self.torch_capable,
        }
    }

    fn apply_torch(&self, on: bool) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if !self.torch_capable {
                return Err(anyhow!("torch constraint not supported by {}", self.label));
            }
            if !self.is_live() {
                return Err(anyhow!("track has ended"));
            }
            self.torch_on.store(on, Ordering::SeqCst);
            Ok(())
        })
    }

    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
        self.torch_on.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

struct VirtualStream {
    id: String,
    track: Arc<VirtualTrack>,
    frames: watch::Receiver<Option<VideoFrame>>,
}

impl CameraStream for VirtualStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn video_track(&self) -> Option<Arc<dyn VideoTrack>> {
        Some(self.track.clone() as Arc<dyn VideoTrack>)
    }

    fn frames(&self) -> watch::Receiver<Option<VideoFrame>> {
        self.frames.clone()
    }

    fn stop(&self) {
        self.track.stop();
    }
}
