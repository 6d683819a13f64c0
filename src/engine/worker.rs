//! Worker Decode Engine
//!
//! Runs the symbol codec on a dedicated thread. Requests carry an id; replies
//! are routed back through a correlation table, one timeout per request.

use image::RgbaImage;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tokio::sync::{mpsc as tokio_mpsc, oneshot};
use tracing::{debug, info, warn};

use super::codec::SymbolDecoder;
use crate::config::{GrayscaleWeights, InversionMode};
use crate::error::{Result, ScanError};
use crate::media::ScanResult;

/// Commands for the worker thread
enum WorkerRequest {
    Decode { id: u64, bitmap: RgbaImage },
    GrayscaleWeights(GrayscaleWeights),
    InversionMode(InversionMode),
    Close,
}

/// Messages posted by the worker thread
#[derive(Debug)]
enum WorkerEvent {
    QrResult {
        id: u64,
        data: Option<ScanResult>,
        error: Option<String>,
    },
    Log(String),
}

type PendingTable = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<ScanResult>>>>>;

/// Removes a request from the correlation table when the caller stops waiting
struct PendingGuard<'a> {
    pending: &'a PendingTable,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

/// Handle to a decoder thread
pub struct WorkerEngine {
    cmd_tx: Mutex<mpsc::Sender<WorkerRequest>>,
    pending: PendingTable,
    next_id: AtomicU64,
    stray_results: Arc<AtomicU64>,
    timeout: Duration,
}

impl WorkerEngine {
    /// Spawn the decoder thread and the reply dispatcher.
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        decoder: Box<dyn SymbolDecoder>,
        weights: GrayscaleWeights,
        inversion: InversionMode,
        timeout: Duration,
    ) -> Result<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<WorkerRequest>();
        let (event_tx, mut event_rx) = tokio_mpsc::unbounded_channel::<WorkerEvent>();

        thread::Builder::new()
            .name("qr-decode-worker".to_string())
            .spawn(move || run_worker(decoder, weights, inversion, cmd_rx, event_tx))
            .map_err(|e| ScanError::Engine(format!("failed to spawn worker thread: {}", e)))?;

        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let stray_results = Arc::new(AtomicU64::new(0));

        let dispatch_pending = pending.clone();
        let dispatch_strays = stray_results.clone();
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                match event {
                    WorkerEvent::QrResult { id, data, error } => {
                        let outcome = match (data, error) {
                            (Some(result), _) => Ok(result),
                            (None, Some(error)) => Err(ScanError::Engine(error)),
                            (None, None) => Err(ScanError::NotFound),
                        };
                        let waiter = dispatch_pending.lock().remove(&id);
                        match waiter {
                            Some(tx) => {
                                let _ = tx.send(outcome);
                            }
                            None => {
                                dispatch_strays.fetch_add(1, Ordering::Relaxed);
                                debug!(id, "Dropping reply for request nobody is waiting on");
                            }
                        }
                    }
                    WorkerEvent::Log(message) => debug!("decode worker: {}", message),
                }
            }
            // Worker gone: dropping the senders wakes every waiter with an error
            dispatch_pending.lock().clear();
            debug!("Decode worker dispatcher stopped");
        });

        info!("Decode worker started");
        Ok(Self {
            cmd_tx: Mutex::new(cmd_tx),
            pending,
            next_id: AtomicU64::new(1),
            stray_results,
            timeout,
        })
    }

    /// Decode `bitmap` on the worker thread
    pub async fn submit(&self, bitmap: RgbaImage) -> Result<ScanResult> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        if self.send(WorkerRequest::Decode { id, bitmap }).is_err() {
            return Err(ScanError::EngineUnavailable);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => {
                warn!(id, "Decode worker exited before replying");
                Err(ScanError::EngineUnavailable)
            }
            Err(_) => {
                warn!(id, timeout_ms = self.timeout.as_millis() as u64, "Decode request timed out");
                Err(ScanError::Engine("timeout".to_string()))
            }
        }
    }

    pub fn set_grayscale_weights(&self, weights: GrayscaleWeights) {
        let _ = self.send(WorkerRequest::GrayscaleWeights(weights));
    }

    pub fn set_inversion_mode(&self, mode: InversionMode) {
        let _ = self.send(WorkerRequest::InversionMode(mode));
    }

    /// Ask the worker thread to exit
    pub fn close(&self) {
        let _ = self.send(WorkerRequest::Close);
    }

    /// Requests still waiting for a reply
    pub fn pending_requests(&self) -> usize {
        self.pending.lock().len()
    }

    /// Replies that arrived after their request was abandoned
    pub fn stray_results(&self) -> u64 {
        self.stray_results.load(Ordering::Relaxed)
    }

    fn send(&self, request: WorkerRequest) -> std::result::Result<(), ()> {
        self.cmd_tx.lock().send(request).map_err(|_| ())
    }
}

impl Drop for WorkerEngine {
    fn drop(&mut self) {
        // Signal worker thread to stop
        self.close();
    }
}

fn run_worker(
    mut decoder: Box<dyn SymbolDecoder>,
    mut weights: GrayscaleWeights,
    mut inversion: InversionMode,
    cmd_rx: mpsc::Receiver<WorkerRequest>,
    event_tx: tokio_mpsc::UnboundedSender<WorkerEvent>,
) {
    let mut luma = Vec::new();

    while let Ok(request) = cmd_rx.recv() {
        match request {
            WorkerRequest::Decode { id, bitmap } => {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    decode_bitmap(decoder.as_mut(), &bitmap, &weights, inversion, &mut luma)
                }));
                let event = match outcome {
                    Ok(Ok(data)) => WorkerEvent::QrResult { id, data, error: None },
                    Ok(Err(error)) => WorkerEvent::QrResult {
                        id,
                        data: None,
                        error: Some(error),
                    },
                    Err(_) => {
                        let _ = event_tx.send(WorkerEvent::Log(format!("codec panicked on request {}", id)));
                        WorkerEvent::QrResult {
                            id,
                            data: None,
                            error: Some("codec panicked".to_string()),
                        }
                    }
                };
                if event_tx.send(event).is_err() {
                    break;
                }
            }
            WorkerRequest::GrayscaleWeights(new_weights) => weights = new_weights,
            WorkerRequest::InversionMode(mode) => inversion = mode,
            WorkerRequest::Close => break,
        }
    }

    let _ = event_tx.send(WorkerEvent::Log("worker closed".to_string()));
}

/// Convert an RGBA bitmap to luma and run the codec in the requested polarity
fn decode_bitmap(
    decoder: &mut dyn SymbolDecoder,
    bitmap: &RgbaImage,
    weights: &GrayscaleWeights,
    inversion: InversionMode,
    luma: &mut Vec<u8>,
) -> std::result::Result<Option<ScanResult>, String> {
    let (width, height) = bitmap.dimensions();
    luma.clear();
    luma.extend(bitmap.pixels().map(|p| weights.luma(p.0[0], p.0[1], p.0[2])));

    if inversion != InversionMode::Invert {
        if let Some(result) = decoder.decode(luma, width, height)? {
            return Ok(Some(result));
        }
        if inversion == InversionMode::Original {
            return Ok(None);
        }
    }

    for value in luma.iter_mut() {
        *value = 255 - *value;
    }
    decoder.decode(luma, width, height)
}
