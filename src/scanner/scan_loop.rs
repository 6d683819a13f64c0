//! Scan loop
//!
//! One task per started stream. Every delivered frame is a scheduling point:
//! the loop samples the scan region, hands the bitmap to the decode engine and
//! reports the outcome, then waits for the next frame. A loop exits as soon as
//! scanning stops or a newer loop replaces it.

use std::sync::Weak;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::Inner;
use crate::error::ScanError;
use crate::media::region::calculate_scan_region;
use crate::media::{FrameCanvas, ScanRegion, VideoFrame};

pub(super) async fn run(
    scanner: Weak<Inner>,
    generation: u64,
    mut frames: watch::Receiver<Option<VideoFrame>>,
) {
    let mut canvas = FrameCanvas::new();
    let mut region: Option<((u32, u32), ScanRegion)> = None;
    let mut last_scan: Option<Instant> = None;
    let mut cycles = 0u64;

    debug!(generation, "Scan loop started");

    loop {
        if frames.changed().await.is_err() {
            debug!(generation, "Frame feed closed");
            break;
        }

        let Some(inner) = scanner.upgrade() else {
            break;
        };
        if !inner.loop_is_current(generation) {
            break;
        }
        if !inner.is_visible() || !inner.video.is_ready() {
            continue;
        }
        if let Some(last) = last_scan {
            if last.elapsed() < inner.min_scan_interval {
                continue;
            }
        }

        let Some(frame) = frames.borrow_and_update().clone() else {
            continue;
        };

        let dimensions = (frame.width, frame.height);
        let scan_region = match region {
            Some((known, scan_region)) if known == dimensions => scan_region,
            _ => {
                let scan_region = calculate_scan_region(
                    inner.scan_region_calculator.as_ref(),
                    frame.width,
                    frame.height,
                    inner.downscaled_size,
                );
                debug!(
                    generation,
                    width = frame.width,
                    height = frame.height,
                    "Scan region {:?}",
                    scan_region
                );
                inner.state.lock().scan_region = Some(scan_region);
                region = Some((dimensions, scan_region));
                scan_region
            }
        };

        let engine = {
            let mut slot = inner.engine.lock().await;
            if !inner.loop_is_current(generation) {
                break;
            }
            match slot.as_ref() {
                Some(engine) => engine.clone(),
                None => match inner.create_engine().await {
                    Ok(engine) => {
                        *slot = Some(engine.clone());
                        engine
                    }
                    Err(e) => {
                        drop(slot);
                        warn!(generation, "Decode engine creation failed: {}", e);
                        (inner.on_decode_error)(&e);
                        continue;
                    }
                },
            }
        };

        let bitmap = canvas.draw(&frame.image, Some(&scan_region), false).clone();
        last_scan = Some(Instant::now());
        cycles += 1;
        trace!(generation, frame_id = frame.frame_id, cycles, "Decoding frame");

        // The slot is not held here so knob changes never wait on a decode
        let outcome = engine.submit(bitmap).await;

        if matches!(outcome, Err(ScanError::EngineUnavailable)) {
            warn!(generation, "Decode engine unavailable, replacing it");
            engine.close();
            let mut slot = inner.engine.lock().await;
            if slot.as_ref().is_some_and(|current| current.same_engine(&engine)) {
                *slot = None;
                match inner.create_engine().await {
                    Ok(fresh) => *slot = Some(fresh),
                    Err(e) => warn!(generation, "Replacement engine creation failed: {}", e),
                }
            }
            continue;
        }

        if !inner.loop_is_current(generation) {
            break;
        }
        match outcome {
            Ok(mut result) => {
                result.corner_points = result
                    .corner_points
                    .into_iter()
                    .map(|point| scan_region.to_frame_point(point))
                    .collect();
                debug!(generation, frame_id = frame.frame_id, "Decoded {} bytes", result.data.len());
                (inner.on_decode)(result);
            }
            Err(e) => (inner.on_decode_error)(&e),
        }
    }

    debug!(generation, cycles, "Scan loop finished");
}
