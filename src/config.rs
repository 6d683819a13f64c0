//! Scanner Configuration
//!
//! Persistent settings for the scanner and the decode engine knobs they carry.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::camera::CameraPreference;
use crate::media::DEFAULT_CANVAS_SIZE;

/// Scanner settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerSettings {
    /// Camera to open on start
    pub preferred_camera: CameraPreference,

    /// Upper bound on decode attempts per second
    pub max_scans_per_second: u32,

    /// Edge length of the bitmap the scan region is scaled to
    pub downscaled_size: u32,

    /// Which polarity the worker engine looks for
    pub inversion_mode: InversionMode,

    /// RGB to luma conversion used by the worker engine
    pub grayscale_weights: GrayscaleWeights,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            preferred_camera: CameraPreference::default(),
            max_scans_per_second: 25,
            downscaled_size: DEFAULT_CANVAS_SIZE,
            inversion_mode: InversionMode::Original,
            grayscale_weights: GrayscaleWeights::default(),
        }
    }
}

impl ScannerSettings {
    /// Get settings file path
    fn file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("qr-scanner").join("settings.json"))
    }

    /// Load settings from disk
    pub fn load() -> Result<Self> {
        let path = Self::file_path().ok_or_else(|| anyhow::anyhow!("No config directory"))?;
        Self::load_from(&path)
    }

    /// Save settings to disk
    pub fn save(&self) -> Result<()> {
        let path = Self::file_path().ok_or_else(|| anyhow::anyhow!("No config directory"))?;
        self.save_to(&path)
    }

    /// Load settings from `path`, falling back to defaults when it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let settings: ScannerSettings = serde_json::from_str(&content)?;
        Ok(settings)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Minimum time between two decode attempts
    pub fn min_scan_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.max_scans_per_second.max(1) as f64)
    }
}

/// Symbol polarity to search for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InversionMode {
    /// Dark modules on a light background
    #[default]
    Original,
    /// Light modules on a dark background
    Invert,
    /// Try original first, then inverted
    Both,
}

impl InversionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InversionMode::Original => "original",
            InversionMode::Invert => "invert",
            InversionMode::Both => "both",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::all().iter().copied().find(|m| m.as_str() == value)
    }

    pub fn all() -> &'static [InversionMode] {
        &[InversionMode::Original, InversionMode::Invert, InversionMode::Both]
    }
}

/// Channel weights for RGB to luma conversion.
///
/// With `use_integer_approximation` the weights are 8.8 fixed point and
/// should sum to 256; otherwise they are plain factors that should sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrayscaleWeights {
    pub red: f32,
    pub green: f32,
    pub blue: f32,
    pub use_integer_approximation: bool,
}

impl Default for GrayscaleWeights {
    fn default() -> Self {
        Self {
            red: 77.0,
            green: 150.0,
            blue: 29.0,
            use_integer_approximation: true,
        }
    }
}

impl GrayscaleWeights {
    /// Convert one pixel to luma
    #[inline]
    pub fn luma(&self, r: u8, g: u8, b: u8) -> u8 {
        if self.use_integer_approximation {
            let sum = r as u32 * self.red as u32
                + g as u32 * self.green as u32
                + b as u32 * self.blue as u32
                + 128;
            (sum >> 8).min(255) as u8
        } else {
            let value = r as f32 * self.red + g as f32 * self.green + b as f32 * self.blue;
            value.round().clamp(0.0, 255.0) as u8
        }
    }
}
