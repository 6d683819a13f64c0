//! Camera Session Manager
//!
//! Opens camera streams with progressively relaxed constraints, guesses which
//! way the opened camera faces and wraps torch control.

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

use super::{
    Camera, CameraBackend, CameraPreference, CameraStream, Constrain, DeviceKind, FacingMode,
    VideoConstraints,
};
use crate::error::{Result, ScanError};

/// Minimum widths tried in order; `None` lets the platform pick
const MIN_WIDTH_STEPS: [Option<u32>; 3] = [Some(1024), Some(768), None];

static ENVIRONMENT_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)rear|back|environment").expect("valid regex"));
static USER_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)front|user|face").expect("valid regex"));

/// Guess the facing mode from a device label.
///
/// Best effort: platforms with opaque labels yield `None`, and a wrong guess
/// only affects preview mirroring.
pub fn facing_mode_from_label(label: &str) -> Option<FacingMode> {
    if ENVIRONMENT_LABEL.is_match(label) {
        Some(FacingMode::Environment)
    } else if USER_LABEL.is_match(label) {
        Some(FacingMode::User)
    } else {
        None
    }
}

/// Whether the stream's video track advertises a torch
pub fn stream_has_torch(stream: &dyn CameraStream) -> bool {
    stream
        .video_track()
        .map(|track| track.capabilities().torch)
        .unwrap_or(false)
}

/// Switch the torch of `stream` on or off
pub async fn apply_torch(stream: &dyn CameraStream, on: bool) -> Result<()> {
    let track = stream.video_track().ok_or(ScanError::NoFlashAvailable)?;
    if !track.capabilities().torch {
        return Err(ScanError::NoFlashAvailable);
    }
    track.apply_torch(on).await.map_err(|e| {
        warn!("Applying torch={} failed: {}", on, e);
        ScanError::NoFlashAvailable
    })
}

/// A freshly opened stream and the facing mode it was resolved to
pub struct AcquiredStream {
    pub stream: Arc<dyn CameraStream>,
    pub facing_mode: FacingMode,
}

pub struct CameraSession {
    backend: Option<Arc<dyn CameraBackend>>,
    preferred: CameraPreference,
    facing_mode: Option<FacingMode>,
}

impl CameraSession {
    pub fn new(backend: Option<Arc<dyn CameraBackend>>, preferred: CameraPreference) -> Self {
        Self {
            backend,
            preferred,
            facing_mode: None,
        }
    }

    pub fn backend(&self) -> Option<&Arc<dyn CameraBackend>> {
        self.backend.as_ref()
    }

    pub fn preferred_camera(&self) -> &CameraPreference {
        &self.preferred
    }

    /// Returns false when `preference` is already selected
    pub fn set_preferred_camera(&mut self, preference: CameraPreference) -> bool {
        if self.preferred == preference {
            return false;
        }
        self.preferred = preference;
        true
    }

    /// Facing mode of the last started stream
    pub fn facing_mode(&self) -> Option<FacingMode> {
        self.facing_mode
    }

    /// Constraint sets for `acquire`, most demanding first
    pub fn constraint_sets(preference: Option<&CameraPreference>, exact: bool) -> Vec<VideoConstraints> {
        MIN_WIDTH_STEPS
            .iter()
            .map(|min_width| {
                let mut constraints = VideoConstraints {
                    min_width: *min_width,
                    ..Default::default()
                };
                match preference {
                    Some(CameraPreference::Facing(mode)) => {
                        constraints.facing_mode = Some(if exact {
                            Constrain::Exact(*mode)
                        } else {
                            Constrain::Ideal(*mode)
                        });
                    }
                    Some(CameraPreference::Device(id)) => {
                        constraints.device_id = Some(if exact {
                            Constrain::Exact(id.clone())
                        } else {
                            Constrain::Ideal(id.clone())
                        });
                    }
                    None => {}
                }
                constraints
            })
            .collect()
    }

    /// Open the first stream the platform grants for the constraint ladder
    pub async fn acquire(
        &self,
        preference: Option<&CameraPreference>,
        exact: bool,
    ) -> Result<Arc<dyn CameraStream>> {
        let backend = self.backend.as_ref().ok_or(ScanError::CameraNotFound)?;

        for constraints in Self::constraint_sets(preference, exact) {
            match backend.open(constraints.clone()).await {
                Ok(stream) => return Ok(stream),
                Err(e) => debug!("Camera rejected {:?}: {}", constraints, e),
            }
        }

        Err(ScanError::CameraNotFound)
    }

    /// Open a stream for the preferred camera.
    ///
    /// The preference is tried as an exact match first; if that fails any
    /// camera is accepted. The facing mode comes from the track label when it
    /// says so, otherwise from the preference (`Environment` for device ids).
    pub async fn start(&mut self) -> Result<AcquiredStream> {
        let preference = self.preferred.clone();
        let guess = preference.facing_mode().unwrap_or(FacingMode::Environment);

        let stream = match self.acquire(Some(&preference), true).await {
            Ok(stream) => stream,
            Err(_) => {
                debug!(
                    "No camera matches {} exactly, trying any camera (likely {})",
                    preference,
                    guess.flipped()
                );
                self.acquire(None, false).await?
            }
        };

        let facing_mode = stream
            .video_track()
            .and_then(|track| facing_mode_from_label(&track.label()))
            .unwrap_or(guess);

        info!("Camera stream {} started (facing {})", stream.id(), facing_mode);
        self.facing_mode = Some(facing_mode);
        Ok(AcquiredStream { stream, facing_mode })
    }

    /// Whether the preferred camera has a torch. Opens the camera briefly.
    pub async fn has_flash(&self) -> bool {
        let stream = match self.acquire(Some(&self.preferred), true).await {
            Ok(stream) => stream,
            Err(_) => match self.acquire(None, false).await {
                Ok(stream) => stream,
                Err(_) => return false,
            },
        };
        let torch = stream_has_torch(stream.as_ref());
        stream.stop();
        torch
    }
}

/// List video input devices.
///
/// With `request_labels`, a stream is opened briefly when every label is
/// blank so the platform reveals them. Failures there are ignored; missing
/// labels fall back to "Default Camera" / "Camera N".
pub async fn list_cameras(backend: Option<&dyn CameraBackend>, request_labels: bool) -> Result<Vec<Camera>> {
    let Some(backend) = backend else {
        return Ok(Vec::new());
    };

    let mut opened: Option<Arc<dyn CameraStream>> = None;
    if request_labels {
        match enumerate_cameras(backend).await {
            Ok(devices) if devices.iter().all(|(_, label)| label.is_empty()) => {
                match backend.open(VideoConstraints::default()).await {
                    Ok(stream) => opened = Some(stream),
                    Err(e) => debug!("Could not open a stream to unlock labels: {}", e),
                }
            }
            Ok(_) => {}
            Err(e) => debug!("Device enumeration failed: {}", e),
        }
    }

    let cameras = enumerate_cameras(backend).await;
    if let Some(stream) = opened {
        stream.stop();
    }

    let cameras = cameras.map_err(|e| {
        warn!("Device enumeration failed: {}", e);
        ScanError::CameraNotFound
    })?;

    Ok(cameras
        .into_iter()
        .enumerate()
        .map(|(i, (id, label))| Camera {
            id,
            label: if !label.is_empty() {
                label
            } else if i == 0 {
                "Default Camera".to_string()
            } else {
                format!("Camera {}", i + 1)
            },
        })
        .collect())
}

/// Whether any camera is present. Enumeration failures count as none.
pub async fn has_camera(backend: Option<&dyn CameraBackend>) -> bool {
    match list_cameras(backend, false).await {
        Ok(cameras) => !cameras.is_empty(),
        Err(_) => false,
    }
}

async fn enumerate_cameras(backend: &dyn CameraBackend) -> anyhow::Result<Vec<(String, String)>> {
    Ok(backend
        .enumerate_devices()
        .await?
        .into_iter()
        .filter(|device| device.kind == DeviceKind::VideoInput)
        .map(|device| (device.device_id, device.label))
        .collect())
}
