//! Webcam Backend
//!
//! Hardware cameras through `nokhwa` (build with `--features webcam`).
//! A `nokhwa::Camera` is `!Send`, so every open stream owns a blocking capture
//! thread that decodes frames to RGBA and publishes them on the stream's feed.
//! Webcams report neither orientation nor a torch: facing mode is read from
//! the device name and torch requests are refused.

use image::{DynamicImage, RgbImage, RgbaImage};

use super::session::facing_mode_from_label;
use super::{Constrain, FacingMode, VideoConstraints};

/// Camera found by a device query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebcamDevice {
    pub index: u32,
    pub name: String,
}

impl WebcamDevice {
    pub fn device_id(&self) -> String {
        self.index.to_string()
    }

    pub fn facing(&self) -> Option<FacingMode> {
        facing_mode_from_label(&self.name)
    }

    fn satisfies(&self, constraints: &VideoConstraints) -> bool {
        let facing_ok = constraints
            .facing_mode
            .as_ref()
            .map_or(true, |wanted| wanted.accepts(self.facing().as_ref()));
        let id_ok = constraints
            .device_id
            .as_ref()
            .map_or(true, |wanted| wanted.accepts(Some(&self.device_id())));
        facing_ok && id_ok
    }

    fn ideal_score(&self, constraints: &VideoConstraints) -> u32 {
        let mut score = 0;
        if let Some(Constrain::Ideal(facing)) = &constraints.facing_mode {
            if self.facing() == Some(*facing) {
                score += 1;
            }
        }
        if let Some(Constrain::Ideal(id)) = &constraints.device_id {
            if self.device_id() == *id {
                score += 1;
            }
        }
        score
    }
}

/// Pick the device for `constraints`.
///
/// Exact constraints filter, ideal ones rank; ties go to the first device.
/// Minimum width can only be checked once the device is opened.
pub fn select_device<'a>(
    devices: &'a [WebcamDevice],
    constraints: &VideoConstraints,
) -> Option<&'a WebcamDevice> {
    devices
        .iter()
        .filter(|d| d.satisfies(constraints))
        .rev()
        .max_by_key(|d| d.ideal_score(constraints))
}

/// Expand packed RGB from the camera into an RGBA frame
pub fn rgb_to_rgba(width: u32, height: u32, rgb: Vec<u8>) -> Option<RgbaImage> {
    RgbImage::from_raw(width, height, rgb).map(|image| DynamicImage::ImageRgb8(image).to_rgba8())
}

#[cfg(feature = "webcam")]
pub use capture::WebcamBackend;

#[cfg(feature = "webcam")]
mod capture {
    use anyhow::{anyhow, Result};
    use futures::future::BoxFuture;
    use nokhwa::pixel_format::RgbFormat;
    use nokhwa::utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType};
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::{oneshot, watch};
    use tracing::{debug, info, warn};

    use super::{rgb_to_rgba, select_device, WebcamDevice};
    use crate::camera::{
        CameraBackend, CameraStream, DeviceKind, MediaDeviceInfo, TrackCapabilities,
        VideoConstraints, VideoTrack,
    };
    use crate::media::VideoFrame;

    /// Camera backend over the platform's native capture API
    pub struct WebcamBackend {
        api: ApiBackend,
        stream_counter: AtomicU64,
    }

    impl WebcamBackend {
        pub fn native() -> Result<Self> {
            let api = nokhwa::native_api_backend()
                .ok_or_else(|| anyhow!("No camera backend available"))?;
            Ok(Self {
                api,
                stream_counter: AtomicU64::new(1),
            })
        }

        async fn query(&self) -> Result<Vec<WebcamDevice>> {
            let api = self.api;
            tokio::task::spawn_blocking(move || query_devices(api)).await?
        }
    }

    fn query_devices(api: ApiBackend) -> Result<Vec<WebcamDevice>> {
        let cameras = nokhwa::query(api).map_err(|e| anyhow!("Failed to query cameras: {e}"))?;

        Ok(cameras
            .into_iter()
            .filter_map(|info| match info.index() {
                CameraIndex::Index(index) => Some(WebcamDevice {
                    index: *index,
                    name: info.human_name(),
                }),
                CameraIndex::String(path) => {
                    debug!(path = %path, "Skipping camera without a numeric index");
                    None
                }
            })
            .collect())
    }

    impl CameraBackend for WebcamBackend {
        fn enumerate_devices(&self) -> BoxFuture<'_, Result<Vec<MediaDeviceInfo>>> {
            Box::pin(async move {
                Ok(self
                    .query()
                    .await?
                    .into_iter()
                    .map(|device| MediaDeviceInfo {
                        device_id: device.device_id(),
                        kind: DeviceKind::VideoInput,
                        label: device.name,
                    })
                    .collect())
            })
        }

        fn open(&self, constraints: VideoConstraints) -> BoxFuture<'_, Result<Arc<dyn CameraStream>>> {
            Box::pin(async move {
                let devices = self.query().await?;
                let device = select_device(&devices, &constraints)
                    .cloned()
                    .ok_or_else(|| anyhow!("OverconstrainedError: {:?}", constraints))?;

                let id = format!(
                    "webcam-{}#{}",
                    device.index,
                    self.stream_counter.fetch_add(1, Ordering::Relaxed)
                );
                let track = Arc::new(WebcamTrack {
                    label: device.name.clone(),
                    live: AtomicBool::new(true),
                });
                let (frame_tx, frame_rx) = watch::channel::<Option<VideoFrame>>(None);
                let (opened_tx, opened_rx) = oneshot::channel();

                let feed_track = track.clone();
                let min_width = constraints.min_width;
                tokio::task::spawn_blocking(move || {
                    capture(device.index, min_width, feed_track, frame_tx, opened_tx)
                });

                opened_rx
                    .await
                    .map_err(|_| anyhow!("capture thread exited before opening the camera"))??;

                Ok(Arc::new(WebcamStream {
                    id,
                    track,
                    frames: frame_rx,
                }) as Arc<dyn CameraStream>)
            })
        }
    }

    /// Runs on the blocking pool until the track is stopped or the stream dropped
    fn capture(
        index: u32,
        min_width: Option<u32>,
        track: Arc<WebcamTrack>,
        frames: watch::Sender<Option<VideoFrame>>,
        opened: oneshot::Sender<Result<()>>,
    ) {
        let requested =
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestResolution);

        let mut camera = match nokhwa::Camera::new(CameraIndex::Index(index), requested) {
            Ok(camera) => camera,
            Err(e) => {
                let _ = opened.send(Err(anyhow!("Failed to open webcam {index}: {e}")));
                return;
            }
        };
        if let Err(e) = camera.open_stream() {
            let _ = opened.send(Err(anyhow!("Failed to open webcam stream {index}: {e}")));
            return;
        }

        let resolution = camera.resolution();
        if let Some(min_width) = min_width {
            if resolution.width() < min_width {
                let _ = camera.stop_stream();
                let _ = opened.send(Err(anyhow!(
                    "OverconstrainedError: webcam {} is {} wide, need {}",
                    index,
                    resolution.width(),
                    min_width
                )));
                return;
            }
        }

        info!(
            device = index,
            width = resolution.width(),
            height = resolution.height(),
            "Webcam capture started"
        );
        if opened.send(Ok(())).is_err() {
            let _ = camera.stop_stream();
            return;
        }

        let mut captured = 0u64;
        while track.is_live() {
            match camera.frame() {
                Ok(buffer) => match buffer.decode_image::<RgbFormat>() {
                    Ok(decoded) => {
                        let (width, height) = decoded.dimensions();
                        let Some(image) = rgb_to_rgba(width, height, decoded.into_raw()) else {
                            continue;
                        };
                        captured += 1;
                        if frames.send(Some(VideoFrame::new(Arc::new(image)))).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to decode webcam frame"),
                },
                Err(e) => {
                    warn!(error = %e, "Failed to capture webcam frame");
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
        }

        if let Err(e) = camera.stop_stream() {
            warn!(error = %e, "Error stopping webcam stream");
        }
        info!(device = index, captured, "Webcam capture stopped");
    }

    struct WebcamTrack {
        label: String,
        live: AtomicBool,
    }

    impl VideoTrack for WebcamTrack {
        fn label(&self) -> String {
            self.label.clone()
        }

        fn capabilities(&self) -> TrackCapabilities {
            TrackCapabilities::default()
        }

        fn apply_torch(&self, _on: bool) -> BoxFuture<'_, Result<()>> {
            Box::pin(async move { Err(anyhow!("torch control not supported by {}", self.label)) })
        }

        fn stop(&self) {
            self.live.store(false, Ordering::SeqCst);
        }

        fn is_live(&self) -> bool {
            self.live.load(Ordering::SeqCst)
        }
    }

    struct WebcamStream {
        id: String,
        track: Arc<WebcamTrack>,
        frames: watch::Receiver<Option<VideoFrame>>,
    }

    impl CameraStream for WebcamStream {
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
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devices() -> Vec<WebcamDevice> {
        vec![
            WebcamDevice {
                index: 0,
                name: "Integrated Camera".to_string(),
            },
            WebcamDevice {
                index: 1,
                name: "USB Rear Document Camera".to_string(),
            },
            WebcamDevice {
                index: 2,
                name: "FaceTime HD Camera".to_string(),
            },
        ]
    }

    #[test]
    fn test_facing_from_device_name() {
        let devices = devices();
        assert_eq!(devices[0].facing(), None);
        assert_eq!(devices[1].facing(), Some(FacingMode::Environment));
        assert_eq!(devices[2].facing(), Some(FacingMode::User));
    }

    #[test]
    fn test_exact_constraints_filter() {
        let devices = devices();
        let by_id = VideoConstraints {
            device_id: Some(Constrain::Exact("2".to_string())),
            ..Default::default()
        };
        assert_eq!(select_device(&devices, &by_id).map(|d| d.index), Some(2));

        let missing = VideoConstraints {
            device_id: Some(Constrain::Exact("7".to_string())),
            ..Default::default()
        };
        assert!(select_device(&devices, &missing).is_none());

        let rear = VideoConstraints {
            facing_mode: Some(Constrain::Exact(FacingMode::Environment)),
            ..Default::default()
        };
        assert_eq!(select_device(&devices, &rear).map(|d| d.index), Some(1));
    }

    #[test]
    fn test_ideal_constraints_rank_without_rejecting() {
        let devices = devices();
        let front = VideoConstraints {
            facing_mode: Some(Constrain::Ideal(FacingMode::User)),
            ..Default::default()
        };
        assert_eq!(select_device(&devices, &front).map(|d| d.index), Some(2));

        let unknown = VideoConstraints {
            device_id: Some(Constrain::Ideal("9".to_string())),
            ..Default::default()
        };
        assert_eq!(select_device(&devices, &unknown).map(|d| d.index), Some(0));
        assert!(select_device(&[], &VideoConstraints::default()).is_none());
    }

    #[test]
    fn test_rgb_frames_expand_to_rgba() {
        let image = rgb_to_rgba(2, 1, vec![10, 20, 30, 200, 100, 0]).unwrap();
        assert_eq!(image.dimensions(), (2, 1));
        assert_eq!(image.get_pixel(0, 0).0, [10, 20, 30, 255]);
        assert_eq!(image.get_pixel(1, 0).0, [200, 100, 0, 255]);

        assert!(rgb_to_rgba(2, 2, vec![0; 6]).is_none());
    }
}
