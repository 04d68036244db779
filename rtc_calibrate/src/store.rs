//! Shared corrected-pixel buffer.
//!
//! Workers write disjoint regions of the same frame concurrently. Each
//! pixel is an `f32` bit pattern in an `AtomicU32`, so no worker needs a
//! lock or `unsafe` to publish its region.

use std::sync::atomic::{AtomicU32, Ordering};

/// Corrected pixels for every camera, laid out like the raw buffer.
#[derive(Debug)]
pub struct CalibratedPixels {
    cells: Box<[AtomicU32]>,
}

impl CalibratedPixels {
    /// Buffer of `len` zeroed pixels.
    pub fn new(len: usize) -> Self {
        Self {
            cells: (0..len).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    /// Pixel count.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// True for a zero-length buffer.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Value at `index`, or `None` past the end.
    pub fn get(&self, index: usize) -> Option<f32> {
        self.cells
            .get(index)
            .map(|c| f32::from_bits(c.load(Ordering::Relaxed)))
    }

    /// Write `values` to the positions yielded by `indices`, pairwise.
    pub fn write_region(&self, indices: impl Iterator<Item = usize>, values: &[f32]) {
        for (i, &v) in indices.zip(values) {
            if let Some(cell) = self.cells.get(i) {
                cell.store(v.to_bits(), Ordering::Relaxed);
            }
        }
    }

    /// Copy of the whole buffer.
    pub fn snapshot(&self) -> Vec<f32> {
        self.cells
            .iter()
            .map(|c| f32::from_bits(c.load(Ordering::Relaxed)))
            .collect()
    }
}
