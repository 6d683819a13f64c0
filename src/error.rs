//! Scanner error taxonomy

use thiserror::Error;

/// Errors surfaced by the scanner, the decode engines and the one-shot decode path.
///
/// `NotFound` is the expected per-frame outcome while nothing is in view and is
/// never fatal to the scan loop. `EngineUnavailable` tells the owner of an
/// [`EngineHandle`](crate::engine::EngineHandle) to discard it and create a new one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("No QR code found")]
    NotFound,

    #[error("Camera not found.")]
    CameraNotFound,

    #[error("No flash available")]
    NoFlashAvailable,

    #[error("Scanner error: {0}")]
    Engine(String),

    /// The engine crashed and cannot serve further requests.
    #[error("Scanner error: decode engine unavailable")]
    EngineUnavailable,

    #[error("Unsupported image source: {0}")]
    UnsupportedInput(String),
}

impl ScanError {
    /// Whether the error is the per-frame "nothing in view" outcome
    pub fn is_not_found(&self) -> bool {
        matches!(self, ScanError::NotFound)
    }
}

pub type Result<T, E = ScanError> = std::result::Result<T, E>;
