//! qr-scanner - QR code scanning from the command line
//!
//! `scan` decodes still images; `watch` plays images through a virtual camera
//! and runs the continuous scanner until the first decode. With the `webcam`
//! feature, `live` does the same on a real camera.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use qr_scanner::camera::virtual_camera::{VirtualCamera, VirtualDevice};
use qr_scanner::{
    scan_image, CameraBackend, CameraPreference, EngineConfig, EngineHandle, ImageSource,
    InversionMode, QrScanner, ScanImageOptions, ScanRegion, ScannerSettings,
};

#[derive(Parser)]
#[command(name = "qr-scanner", version, about = "Scan QR codes from images or a simulated camera")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decode a QR code from each image
    Scan {
        files: Vec<PathBuf>,
        /// Only look inside `x,y,width,height`
        #[arg(long, value_parser = parse_region)]
        region: Option<ScanRegion>,
        /// Retry on the whole image when the region has no code
        #[arg(long)]
        also_full_frame: bool,
        /// original, invert or both
        #[arg(long, value_parser = parse_inversion)]
        inversion: Option<InversionMode>,
    },
    /// Play images as a camera feed and scan it continuously
    Watch {
        files: Vec<PathBuf>,
        #[arg(long, default_value_t = 30)]
        fps: u32,
        /// Device label reported by the virtual camera
        #[arg(long, default_value = "Virtual Back Camera")]
        label: String,
        /// environment, user or a device id
        #[arg(long)]
        camera: Option<String>,
        /// Give up after this many seconds
        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },
    /// Scan a webcam until the first decode
    #[cfg(feature = "webcam")]
    Live {
        /// environment, user or a device index
        #[arg(long)]
        camera: Option<String>,
        /// Store `--camera` as the default for later runs
        #[arg(long, requires = "camera")]
        remember: bool,
        /// Print the available cameras and exit
        #[arg(long)]
        list: bool,
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
}

fn parse_region(value: &str) -> Result<ScanRegion, String> {
    let parts = value
        .split(',')
        .map(|part| part.trim().parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid region '{}': {}", value, e))?;
    match parts[..] {
        [x, y, width, height] if width > 0 && height > 0 => Ok(ScanRegion {
            x,
            y,
            width,
            height,
            downscaled_width: width,
            downscaled_height: height,
        }),
        _ => Err(format!("expected x,y,width,height with a non-empty area, got '{}'", value)),
    }
}

fn parse_inversion(value: &str) -> Result<InversionMode, String> {
    InversionMode::parse(value).ok_or_else(|| {
        let modes: Vec<_> = InversionMode::all().iter().map(|m| m.as_str()).collect();
        format!("unknown inversion mode '{}', expected one of {}", value, modes.join(", "))
    })
}

fn load_settings() -> ScannerSettings {
    match ScannerSettings::load() {
        Ok(settings) => settings,
        Err(e) => {
            warn!("Failed to load settings, using defaults: {}", e);
            ScannerSettings::default()
        }
    }
}

async fn scan_files(
    files: Vec<PathBuf>,
    region: Option<ScanRegion>,
    also_full_frame: bool,
    inversion: Option<InversionMode>,
) -> Result<bool> {
    if files.is_empty() {
        return Err(anyhow!("no image files given"));
    }

    let settings = load_settings();
    let engine = EngineHandle::create(&EngineConfig {
        grayscale_weights: settings.grayscale_weights,
        inversion_mode: inversion.unwrap_or(settings.inversion_mode),
        ..Default::default()
    })
    .await?;

    let mut all_found = true;
    for file in &files {
        let outcome = scan_image(
            ImageSource::Path(file),
            ScanImageOptions {
                scan_region: region,
                engine: Some(&engine),
                also_try_without_scan_region: also_full_frame,
                ..Default::default()
            },
        )
        .await;

        match outcome {
            Ok(result) => println!("{}: {}", file.display(), result.data),
            Err(e) => {
                all_found = false;
                println!("{}: {}", file.display(), e);
            }
        }
    }

    engine.close();
    Ok(all_found)
}

async fn watch_files(
    files: Vec<PathBuf>,
    fps: u32,
    label: String,
    camera: Option<String>,
    timeout: u64,
) -> Result<bool> {
    let frames = files
        .iter()
        .map(|file| {
            image::open(file)
                .map(|image| image.to_rgba8())
                .with_context(|| format!("failed to open {}", file.display()))
        })
        .collect::<Result<Vec<_>>>()?;
    if frames.is_empty() {
        return Err(anyhow!("no image files given"));
    }

    let device = VirtualDevice::new("virtual-0", &label)
        .with_fps(fps)
        .with_frames(frames);
    let backend = Arc::new(VirtualCamera::new(vec![device]));

    let mut settings = load_settings();
    if let Some(camera) = camera {
        settings.preferred_camera = CameraPreference::parse(&camera);
    }

    info!("Scanning virtual camera '{}' at {} fps", label, fps);
    scan_until_decoded(backend, settings, timeout).await
}

#[cfg(feature = "webcam")]
async fn live_camera(camera: Option<String>, remember: bool, list: bool, timeout: u64) -> Result<bool> {
    use qr_scanner::camera::webcam::WebcamBackend;
    use qr_scanner::list_cameras;

    let backend = Arc::new(WebcamBackend::native()?);

    if list {
        for camera in list_cameras(Some(backend.as_ref() as &dyn CameraBackend), true).await? {
            println!("{}\t{}", camera.id, camera.label);
        }
        return Ok(true);
    }

    let mut settings = load_settings();
    if let Some(camera) = camera {
        settings.preferred_camera = CameraPreference::parse(&camera);
        if remember {
            settings
                .save()
                .context("failed to save camera preference")?;
            info!("Saved {} as the default camera", settings.preferred_camera);
        }
    }

    info!("Scanning webcam, preferring {}", settings.preferred_camera);
    scan_until_decoded(backend, settings, timeout).await
}

/// Run the continuous scanner until the first decode or `timeout` seconds
async fn scan_until_decoded(
    backend: Arc<dyn CameraBackend>,
    settings: ScannerSettings,
    timeout: u64,
) -> Result<bool> {
    let (decoded_tx, mut decoded_rx) = mpsc::unbounded_channel();
    let scanner = QrScanner::builder()
        .backend(backend)
        .settings(settings)
        .on_decode(move |result| {
            let _ = decoded_tx.send(result);
        })
        .build();

    scanner.start().await?;

    let first = tokio::time::timeout(Duration::from_secs(timeout), decoded_rx.recv()).await;
    scanner.destroy().await;

    match first {
        Ok(Some(result)) => {
            println!("{}", result.data);
            Ok(true)
        }
        Ok(None) => Err(anyhow!("scanner stopped before decoding anything")),
        Err(_) => {
            println!("No QR code found within {}s", timeout);
            Ok(false)
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    info!("qr-scanner v{}", env!("CARGO_PKG_VERSION"));

    // Create tokio runtime for async operations
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let found = runtime.block_on(async {
        match cli.command {
            Command::Scan {
                files,
                region,
                also_full_frame,
                inversion,
            } => scan_files(files, region, also_full_frame, inversion).await,
            Command::Watch {
                files,
                fps,
                label,
                camera,
                timeout,
            } => watch_files(files, fps, label, camera, timeout).await,
            #[cfg(feature = "webcam")]
            Command::Live {
                camera,
                remember,
                list,
                timeout,
            } => live_camera(camera, remember, list, timeout).await,
        }
    })?;

    if !found {
        std::process::exit(1);
    }
    Ok(())
}
