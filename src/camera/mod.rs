//! Camera Access
//!
//! Platform camera API seams plus the session manager built on top of them.
//! A backend behaves like `getUserMedia`: it enumerates devices and opens
//! streams that satisfy a set of video constraints.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

use crate::media::VideoFrame;

pub mod session;
pub mod virtual_camera;
pub mod webcam;

pub use session::{has_camera, list_cameras, CameraSession};

/// Camera orientation classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// Rear camera
    Environment,
    /// Front camera
    User,
}

impl FacingMode {
    pub fn flipped(self) -> Self {
        match self {
            FacingMode::Environment => FacingMode::User,
            FacingMode::User => FacingMode::Environment,
        }
    }
}

impl fmt::Display for FacingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FacingMode::Environment => write!(f, "environment"),
            FacingMode::User => write!(f, "user"),
        }
    }
}

/// Which camera the scanner should use: a facing mode or a device id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraPreference {
    Facing(FacingMode),
    Device(String),
}

impl CameraPreference {
    /// Parse the textual form used on the command line and in settings:
    /// `environment`, `user`, or anything else as a device id.
    pub fn parse(value: &str) -> Self {
        match value {
            "environment" => CameraPreference::Facing(FacingMode::Environment),
            "user" => CameraPreference::Facing(FacingMode::User),
            id => CameraPreference::Device(id.to_string()),
        }
    }

    pub fn facing_mode(&self) -> Option<FacingMode> {
        match self {
            CameraPreference::Facing(mode) => Some(*mode),
            CameraPreference::Device(_) => None,
        }
    }
}

impl Default for CameraPreference {
    fn default() -> Self {
        CameraPreference::Facing(FacingMode::Environment)
    }
}

impl fmt::Display for CameraPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraPreference::Facing(mode) => write!(f, "{}", mode),
            CameraPreference::Device(id) => write!(f, "{}", id),
        }
    }
}

/// A constraint value that must match (`Exact`) or should match (`Ideal`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constrain<T> {
    Exact(T),
    Ideal(T),
}

impl<T: PartialEq> Constrain<T> {
    /// Whether a device offering `actual` satisfies the constraint.
    /// Ideal constraints never reject a device.
    pub fn accepts(&self, actual: Option<&T>) -> bool {
        match self {
            Constrain::Exact(wanted) => actual == Some(wanted),
            Constrain::Ideal(_) => true,
        }
    }
}

/// Video constraints passed to [`CameraBackend::open`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoConstraints {
    pub min_width: Option<u32>,
    pub facing_mode: Option<Constrain<FacingMode>>,
    pub device_id: Option<Constrain<String>>,
}

impl VideoConstraints {
    pub fn with_min_width(min_width: u32) -> Self {
        Self {
            min_width: Some(min_width),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    VideoInput,
    AudioInput,
    AudioOutput,
}

/// Entry returned by [`CameraBackend::enumerate_devices`].
/// Labels may be empty until camera access has been granted once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDeviceInfo {
    pub device_id: String,
    pub kind: DeviceKind,
    pub label: String,
}

/// Camera as reported by [`list_cameras`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Camera {
    pub id: String,
    pub label: String,
}

/// What a video track can do
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackCapabilities {
    pub torch: bool,
}

/// The video track of an open stream
pub trait VideoTrack: Send + Sync {
    /// Device label, e.g. "Back Camera" or "FaceTime HD Camera"
    fn label(&self) -> String;

    fn capabilities(&self) -> TrackCapabilities;

    /// Apply the torch constraint
    fn apply_torch(&self, on: bool) -> BoxFuture<'_, anyhow::Result<()>>;

    fn stop(&self);

    fn is_live(&self) -> bool;
}

/// An open camera stream
pub trait CameraStream: Send + Sync {
    /// Identifier unique per opened stream
    fn id(&self) -> &str;

    fn video_track(&self) -> Option<Arc<dyn VideoTrack>>;

    /// Frame feed. The value changes once per captured frame.
    fn frames(&self) -> watch::Receiver<Option<VideoFrame>>;

    /// Stop every track of the stream and release the device
    fn stop(&self);
}

/// Platform camera API
pub trait CameraBackend: Send + Sync {
    fn enumerate_devices(&self) -> BoxFuture<'_, anyhow::Result<Vec<MediaDeviceInfo>>>;

    /// Open a stream satisfying `constraints`
    fn open(&self, constraints: VideoConstraints) -> BoxFuture<'_, anyhow::Result<Arc<dyn CameraStream>>>;
}
