//! Symbol codec run by the worker engine
//!
//! The engine treats the codec as opaque: luma in, payload (or nothing) out.

use crate::media::{Point, ScanResult};

/// Decodes a single symbol from an 8-bit luma buffer
pub trait SymbolDecoder: Send + 'static {
    /// `Ok(None)` when no symbol is present, `Err` on an internal fault
    fn decode(&mut self, luma: &[u8], width: u32, height: u32) -> Result<Option<ScanResult>, String>;
}

/// QR codec backed by `rqrr`
#[derive(Debug, Default)]
pub struct RqrrDecoder;

impl RqrrDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl SymbolDecoder for RqrrDecoder {
    fn decode(&mut self, luma: &[u8], width: u32, height: u32) -> Result<Option<ScanResult>, String> {
        let w = width as usize;
        let h = height as usize;
        if luma.len() < w * h {
            return Err(format!("luma buffer too small: {} < {}", luma.len(), w * h));
        }
        if w == 0 || h == 0 {
            return Ok(None);
        }

        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(w, h, |x, y| luma[y * w + x]);
        let grids = prepared.detect_grids();

        for grid in grids {
            match grid.decode() {
                Ok((_, content)) => {
                    let corners = grid
                        .bounds
                        .iter()
                        .map(|p| Point::new(p.x as f32, p.y as f32))
                        .collect();
                    return Ok(Some(ScanResult::new(content).with_corner_points(corners)));
                }
                Err(e) => {
                    log::debug!("Grid decode failed: {:?}", e);
                }
            }
        }

        Ok(None)
    }
}
