use super::*;
use crate::camera::virtual_camera::{VirtualCamera, VirtualDevice};
use crate::engine::{DetectorFault, DECODE_TIMEOUT};
use crate::media::Point;
use crate::test_support::{ScriptedDetector, Step};
use futures::future::BoxFuture;
use image::RgbaImage;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::sleep;

struct Harness {
    scanner: QrScanner,
    camera: Arc<VirtualCamera>,
    detector: Arc<ScriptedDetector>,
    engines_created: Arc<AtomicUsize>,
    decoded: Arc<Mutex<Vec<ScanResult>>>,
    errors: Arc<Mutex<Vec<ScanError>>>,
}

impl Harness {
    fn decoded_data(&self) -> Vec<String> {
        self.decoded.lock().iter().map(|r| r.data.clone()).collect()
    }
}

fn back_camera() -> VirtualDevice {
    VirtualDevice::new("back", "Back Camera")
        .with_facing(FacingMode::Environment)
        .with_frames(vec![RgbaImage::new(640, 480)])
}

fn front_camera() -> VirtualDevice {
    VirtualDevice::new("front", "Front Camera")
        .with_facing(FacingMode::User)
        .with_frames(vec![RgbaImage::new(640, 480)])
}

fn harness_with(
    devices: Vec<VirtualDevice>,
    script: Vec<Step>,
    configure: impl FnOnce(ScannerBuilder) -> ScannerBuilder,
) -> Harness {
    let camera = Arc::new(VirtualCamera::new(devices));
    let detector = Arc::new(ScriptedDetector::new(script));
    let engines_created = Arc::new(AtomicUsize::new(0));
    let decoded = Arc::new(Mutex::new(Vec::new()));
    let errors = Arc::new(Mutex::new(Vec::new()));

    let factory: EngineFactory = {
        let detector = detector.clone();
        let created = engines_created.clone();
        Arc::new(move || -> BoxFuture<'static, Result<EngineHandle>> {
            created.fetch_add(1, Ordering::SeqCst);
            let detector = detector.clone();
            Box::pin(async move { Ok(EngineHandle::native(detector, DECODE_TIMEOUT)) })
        })
    };

    let on_decode = decoded.clone();
    let on_error = errors.clone();
    let builder = QrScanner::builder()
        .backend(camera.clone())
        .engine_factory(factory)
        .on_decode(move |result| on_decode.lock().push(result))
        .on_decode_error(move |e| on_error.lock().push(e.clone()));

    Harness {
        scanner: configure(builder).build(),
        camera,
        detector,
        engines_created,
        decoded,
        errors,
    }
}

fn harness(devices: Vec<VirtualDevice>, script: Vec<Step>) -> Harness {
    harness_with(devices, script, |builder| builder)
}

#[tokio::test(start_paused = true)]
async fn test_not_found_keeps_scanning_until_decode() {
    let h = harness(
        vec![back_camera()],
        vec![Ok(None), Ok(None), Ok(None), Ok(Some("ABC123".to_string()))],
    );
    h.scanner.start().await.unwrap();
    sleep(Duration::from_secs(1)).await;

    assert_eq!(h.decoded_data(), vec!["ABC123".to_string()]);
    let errors = h.errors.lock().clone();
    assert!(errors.len() >= 3);
    assert!(errors.iter().all(|e| *e == ScanError::NotFound));
    // Scanning is continuous: the loop kept going after the decode
    assert!(h.detector.calls() > 4);
    assert!(h.scanner.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_decode_reports_frame_coordinates() {
    let h = harness(vec![back_camera()], vec![Ok(Some("corners".to_string()))]);
    h.scanner.start().await.unwrap();
    sleep(Duration::from_millis(300)).await;

    let region = h.scanner.scan_region().unwrap();
    assert_eq!(
        region,
        ScanRegion {
            x: 160,
            y: 80,
            width: 320,
            height: 320,
            downscaled_width: 400,
            downscaled_height: 400,
        }
    );
    assert!(h.detector.bitmap_sizes().iter().all(|size| *size == (400, 400)));

    let decoded = h.decoded.lock().clone();
    assert_eq!(
        decoded[0].corner_points,
        vec![
            Point::new(160.0, 80.0),
            Point::new(480.0, 80.0),
            Point::new(480.0, 400.0),
            Point::new(160.0, 400.0),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_engine_error_is_reported_and_loop_continues() {
    let h = harness(
        vec![back_camera()],
        vec![
            Err(DetectorFault::Other("glitch".to_string())),
            Ok(Some("after".to_string())),
        ],
    );
    h.scanner.start().await.unwrap();
    sleep(Duration::from_millis(500)).await;

    assert_eq!(h.errors.lock()[0], ScanError::Engine("glitch".to_string()));
    assert_eq!(h.decoded_data(), vec!["after".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_engine_is_replaced() {
    let h = harness(
        vec![back_camera()],
        vec![
            Err(DetectorFault::ServiceUnavailable),
            Ok(Some("fresh engine".to_string())),
        ],
    );
    h.scanner.start().await.unwrap();
    sleep(Duration::from_millis(500)).await;

    assert_eq!(h.engines_created.load(Ordering::SeqCst), 2);
    assert_eq!(h.decoded_data(), vec!["fresh engine".to_string()]);
    assert!(!h.errors.lock().contains(&ScanError::EngineUnavailable));
}

#[tokio::test(start_paused = true)]
async fn test_scan_rate_is_throttled() {
    let h = harness_with(vec![back_camera()], vec![], |builder| {
        builder.max_scans_per_second(5)
    });
    h.scanner.start().await.unwrap();
    sleep(Duration::from_secs(1)).await;

    let calls = h.detector.calls();
    assert!((3..=6).contains(&calls), "{} scans in one second", calls);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_pause_defers_teardown_to_last_window() {
    let h = harness(vec![back_camera()], vec![]);
    h.scanner.start().await.unwrap();
    assert_eq!(h.camera.live_streams(), 1);

    let first = h.scanner.pause(false);
    assert!(h.scanner.is_paused());
    sleep(Duration::from_millis(200)).await;
    let second = h.scanner.pause(false);

    // The first window has elapsed, the second has not
    sleep(Duration::from_millis(200)).await;
    assert_eq!(h.camera.live_streams(), 1);
    assert!(h.scanner.video().has_stream());

    assert!(!first.await);
    assert!(second.await);
    assert_eq!(h.camera.live_streams(), 0);
    assert!(!h.scanner.video().has_stream());
    assert!(h.scanner.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_resume_within_window_keeps_stream() {
    let h = harness(vec![back_camera()], vec![]);
    h.scanner.start().await.unwrap();

    let pause = h.scanner.pause(false);
    sleep(Duration::from_millis(100)).await;
    h.scanner.start().await.unwrap();

    assert!(!pause.await);
    sleep(Duration::from_millis(500)).await;
    assert_eq!(h.camera.open_count(), 1);
    assert_eq!(h.camera.live_streams(), 1);
    assert!(!h.scanner.is_paused());
    assert!(!h.scanner.video().is_paused());
}

#[tokio::test(start_paused = true)]
async fn test_pause_while_inactive_reports_released() {
    let h = harness(vec![back_camera()], vec![]);
    assert!(h.scanner.pause(false).await);
    assert!(h.scanner.is_paused());
    assert_eq!(h.camera.open_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_releases_camera_and_ends_loop() {
    let script = (0..50).map(|_| Ok(Some("X".to_string()))).collect();
    let h = harness(vec![back_camera()], script);
    h.scanner.start().await.unwrap();
    sleep(Duration::from_millis(200)).await;

    h.scanner.stop();
    assert!(!h.scanner.is_active());
    assert_eq!(h.camera.live_streams(), 0);

    let decoded = h.decoded.lock().len();
    let calls = h.detector.calls();
    sleep(Duration::from_millis(500)).await;
    assert_eq!(h.decoded.lock().len(), decoded);
    assert_eq!(h.detector.calls(), calls);
}

#[tokio::test(start_paused = true)]
async fn test_switch_to_same_camera_is_noop() {
    let h = harness(vec![back_camera(), front_camera()], vec![]);
    h.scanner.start().await.unwrap();
    let stream_id = h.scanner.video().stream().unwrap().id().to_string();

    h.scanner
        .set_camera(CameraPreference::Facing(FacingMode::Environment))
        .await
        .unwrap();

    assert_eq!(h.camera.open_count(), 1);
    assert_eq!(h.scanner.video().stream().unwrap().id(), stream_id);
}

#[tokio::test(start_paused = true)]
async fn test_switch_camera_restarts_stream() {
    let h = harness(vec![back_camera(), front_camera()], vec![]);
    h.scanner.start().await.unwrap();
    assert!(!h.scanner.video().is_mirrored());

    h.scanner
        .switch_camera(CameraPreference::Facing(FacingMode::User))
        .await
        .unwrap();

    assert_eq!(h.camera.open_count(), 2);
    assert_eq!(h.camera.live_streams(), 1);
    assert!(h.scanner.video().stream().unwrap().id().starts_with("front#"));
    assert!(h.scanner.video().is_mirrored());
    assert_eq!(
        h.scanner.preferred_camera().await,
        CameraPreference::Facing(FacingMode::User)
    );
}

#[tokio::test(start_paused = true)]
async fn test_switch_camera_while_stopped_only_records_preference() {
    let h = harness(vec![back_camera(), front_camera()], vec![]);
    h.scanner
        .set_camera(CameraPreference::Device("front".to_string()))
        .await
        .unwrap();
    assert_eq!(h.camera.open_count(), 0);

    h.scanner.start().await.unwrap();
    assert!(h.scanner.video().stream().unwrap().id().starts_with("front#"));
}

#[tokio::test(start_paused = true)]
async fn test_start_while_hidden_waits_for_visibility() {
    let signal = VisibilitySignal::new(Visibility::Hidden);
    let h = harness_with(vec![back_camera()], vec![], |builder| {
        builder.visibility(signal.subscribe())
    });

    h.scanner.start().await.unwrap();
    assert!(h.scanner.is_active());
    assert_eq!(h.camera.open_count(), 0);

    signal.set(Visibility::Visible);
    sleep(Duration::from_millis(50)).await;
    assert_eq!(h.camera.open_count(), 1);
    assert_eq!(h.camera.live_streams(), 1);
    assert!(!h.scanner.is_paused());
}

#[tokio::test(start_paused = true)]
async fn test_hidden_pauses_and_visible_resumes() {
    let signal = VisibilitySignal::default();
    let h = harness_with(vec![back_camera()], vec![], |builder| {
        builder.visibility(signal.subscribe())
    });
    h.scanner.start().await.unwrap();

    signal.set(Visibility::Hidden);
    sleep(Duration::from_millis(50)).await;
    assert!(h.scanner.is_paused());
    assert_eq!(h.camera.live_streams(), 1);

    sleep(Duration::from_millis(400)).await;
    assert_eq!(h.camera.live_streams(), 0);

    signal.set(Visibility::Visible);
    sleep(Duration::from_millis(50)).await;
    assert_eq!(h.camera.open_count(), 2);
    assert_eq!(h.camera.live_streams(), 1);
    assert!(h.scanner.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_visible_does_not_start_inactive_scanner() {
    let signal = VisibilitySignal::new(Visibility::Hidden);
    let h = harness_with(vec![back_camera()], vec![], |builder| {
        builder.visibility(signal.subscribe())
    });
    signal.set(Visibility::Visible);
    sleep(Duration::from_millis(50)).await;
    assert_eq!(h.camera.open_count(), 0);
    assert!(!h.scanner.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_start_failure_rolls_back_active() {
    let h = harness(vec![], vec![]);
    assert_eq!(h.scanner.start().await, Err(ScanError::CameraNotFound));
    assert!(!h.scanner.is_active());

    let no_backend = QrScanner::builder().build();
    assert_eq!(no_backend.start().await, Err(ScanError::CameraNotFound));
    assert!(!no_backend.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_flash_request_is_deferred_until_start() {
    let h = harness(vec![back_camera().with_torch(true)], vec![]);
    h.scanner.turn_flash_on().await.unwrap();
    assert!(h.scanner.is_flash_on());
    assert_eq!(h.camera.open_count(), 0);

    h.scanner.start().await.unwrap();
    assert!(h.camera.last_track().unwrap().is_torch_on());
    assert!(h.scanner.is_flash_on());
}

#[tokio::test(start_paused = true)]
async fn test_flash_requested_while_paused_applies_on_resume() {
    let h = harness(vec![back_camera().with_torch(true)], vec![]);
    h.scanner.start().await.unwrap();
    drop(h.scanner.pause(false));
    sleep(Duration::from_millis(100)).await;

    h.scanner.turn_flash_on().await.unwrap();
    assert!(!h.camera.last_track().unwrap().is_torch_on());

    // Still inside the teardown window, so the attached stream is resumed
    h.scanner.start().await.unwrap();
    sleep(Duration::from_millis(500)).await;

    assert!(h.scanner.is_flash_on());
    assert!(h.camera.last_track().unwrap().is_torch_on());
    assert_eq!(h.camera.open_count(), 1);
    assert_eq!(h.camera.live_streams(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_flash_without_torch_rolls_back() {
    let h = harness(vec![back_camera()], vec![]);
    h.scanner.start().await.unwrap();
    assert!(!h.scanner.has_flash().await);

    assert_eq!(h.scanner.set_flash(true).await, Err(ScanError::NoFlashAvailable));
    assert!(!h.scanner.is_flash_on());
}

#[tokio::test(start_paused = true)]
async fn test_flash_off_restarts_stream() {
    let h = harness(vec![back_camera().with_torch(true)], vec![]);
    h.scanner.start().await.unwrap();

    h.scanner.toggle_flash().await.unwrap();
    assert!(h.scanner.is_flash_on());
    assert!(h.camera.last_track().unwrap().is_torch_on());

    h.scanner.toggle_flash().await.unwrap();
    assert!(!h.scanner.is_flash_on());
    assert_eq!(h.camera.open_count(), 2);
    assert_eq!(h.camera.live_streams(), 1);
    assert!(!h.camera.last_track().unwrap().is_torch_on());
    assert!(h.scanner.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_has_flash_probes_without_stream() {
    let h = harness(vec![back_camera().with_torch(true)], vec![]);
    assert!(h.scanner.has_flash().await);
    assert_eq!(h.camera.open_count(), 1);
    assert_eq!(h.camera.live_streams(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_destroy_is_idempotent() {
    let h = harness(vec![back_camera()], vec![]);
    h.scanner.start().await.unwrap();

    h.scanner.destroy().await;
    h.scanner.destroy().await;
    assert!(h.scanner.is_destroyed());
    assert!(!h.scanner.is_active());
    assert_eq!(h.camera.live_streams(), 0);

    h.scanner.start().await.unwrap();
    assert_eq!(h.camera.open_count(), 1);
    assert!(!h.scanner.is_active());
}

#[tokio::test]
async fn test_engine_settings_do_not_wait_for_decode() {
    let camera = Arc::new(VirtualCamera::new(vec![back_camera()]));
    let detector = Arc::new(ScriptedDetector::new(vec![]).with_delay(Duration::from_millis(800)));
    let scanner = QrScanner::builder()
        .backend(camera)
        .native_detector(detector.clone())
        .build();
    scanner.start().await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while detector.calls() == 0 {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let changed = tokio::time::timeout(Duration::from_millis(200), async {
        scanner.set_inversion_mode(InversionMode::Invert).await;
        scanner.set_grayscale_weights(GrayscaleWeights::default()).await;
    })
    .await;
    scanner.destroy().await;

    assert!(changed.is_ok());
}
