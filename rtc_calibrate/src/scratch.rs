//! Per-worker scratch buffers.

use crate::error::CalibrationError;

/// Pixel and sort buffers owned by one worker.
///
/// Capacity only grows; a region smaller than the largest seen so far
/// reuses the existing allocation.
#[derive(Debug, Default)]
pub struct WorkerScratch {
    pixels: Vec<f32>,
    sort: Vec<f32>,
    npxlx: usize,
    npxly: usize,
}

impl WorkerScratch {
    /// Empty scratch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Largest region, in pixels, the buffers currently hold.
    pub fn capacity(&self) -> usize {
        self.pixels.len()
    }

    /// Width of the current region.
    pub fn npxlx(&self) -> usize {
        self.npxlx
    }

    /// Height of the current region.
    pub fn npxly(&self) -> usize {
        self.npxly
    }

    /// Pixel count of the current region.
    pub fn npxl(&self) -> usize {
        self.npxlx * self.npxly
    }

    /// Size the buffers for an `npxlx × npxly` region.
    pub fn prepare(&mut self, thread: usize, npxlx: usize, npxly: usize) -> Result<(), CalibrationError> {
        let npxl = npxlx * npxly;
        if npxl > self.pixels.len() {
            let grow = |buf: &mut Vec<f32>| -> Result<(), CalibrationError> {
                buf.try_reserve_exact(npxl - buf.len())
                    .map_err(|_| CalibrationError::ScratchAlloc {
                        thread,
                        requested: npxl,
                    })?;
                buf.resize(npxl, 0.0);
                Ok(())
            };
            grow(&mut self.pixels)?;
            grow(&mut self.sort)?;
        }
        self.npxlx = npxlx;
        self.npxly = npxly;
        Ok(())
    }

    /// Pixels of the current region.
    pub fn pixels(&self) -> &[f32] {
        &self.pixels[..self.npxl()]
    }

    /// Mutable pixels of the current region.
    pub fn pixels_mut(&mut self) -> &mut [f32] {
        let n = self.npxl();
        &mut self.pixels[..n]
    }

    /// Pixels and a same-sized sort buffer.
    pub fn split_mut(&mut self) -> (&mut [f32], &mut [f32]) {
        let n = self.npxl();
        (&mut self.pixels[..n], &mut self.sort[..n])
    }
}
