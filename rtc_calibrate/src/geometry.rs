//! Subaperture geometry and camera layout.
//!
//! A subaperture is a strided rectangle inside one camera frame. The host
//! publishes them as a flat table of six `i32` words per subaperture:
//! `[row_start, row_end, row_step, col_start, col_end, col_step]`, with
//! `end` exclusive. Pixels of all cameras live back to back in one buffer;
//! camera `c` starts at [`CameraLayout::offset`].

use rtc_common::ingest::ParamError;

use crate::error::CalibrationError;

// ─── Stride ─────────────────────────────────────────────────────────

/// Half-open strided range `start..end` stepping by `step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stride {
    /// First index.
    pub start: i32,
    /// Exclusive end.
    pub end: i32,
    /// Increment.
    pub step: i32,
}

impl Stride {
    /// Number of indices visited: `ceil((end - start) / step)`, zero when
    /// the range is empty or the step is not positive.
    pub fn count(&self) -> usize {
        if self.step <= 0 || self.end <= self.start {
            return 0;
        }
        let span = (self.end - self.start) as usize;
        let step = self.step as usize;
        span.div_ceil(step)
    }

    /// Visited indices in ascending order.
    pub fn indices(&self) -> impl Iterator<Item = usize> + Clone + use<> {
        let (start, step, n) = (self.start.max(0) as usize, self.step.max(1) as usize, self.count());
        (0..n).map(move |k| start + k * step)
    }

    /// Last visited index, if any.
    fn last(&self) -> Option<i64> {
        match self.count() {
            0 => None,
            n => Some(self.start as i64 + (n as i64 - 1) * self.step as i64),
        }
    }

    fn check(&self, axis: &str, limit: usize) -> Result<(), String> {
        if self.step <= 0 {
            return Err(format!("{axis} step {} must be positive", self.step));
        }
        if self.start < 0 {
            return Err(format!("{axis} start {} is negative", self.start));
        }
        match self.last() {
            Some(last) if last >= limit as i64 => {
                Err(format!("{axis} index {last} beyond frame size {limit}"))
            }
            _ => Ok(()),
        }
    }
}

// ─── Descriptor ─────────────────────────────────────────────────────

/// One subaperture region within a camera frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubapertureDescriptor {
    /// Row range.
    pub rows: Stride,
    /// Column range.
    pub cols: Stride,
}

impl SubapertureDescriptor {
    /// Words per descriptor in the location table.
    pub const WORDS: usize = 6;

    /// Descriptor from its six table words.
    pub fn from_words(w: [i32; 6]) -> Self {
        Self {
            rows: Stride {
                start: w[0],
                end: w[1],
                step: w[2],
            },
            cols: Stride {
                start: w[3],
                end: w[4],
                step: w[5],
            },
        }
    }

    /// Descriptor `index` of a flat location table.
    pub fn from_table(table: &[i32], index: usize) -> Option<Self> {
        let at = index.checked_mul(Self::WORDS)?;
        let words = table.get(at..at + Self::WORDS)?;
        let mut w = [0i32; 6];
        w.copy_from_slice(words);
        Some(Self::from_words(w))
    }

    /// Visited columns.
    pub fn npxlx(&self) -> usize {
        self.cols.count()
    }

    /// Visited rows.
    pub fn npxly(&self) -> usize {
        self.rows.count()
    }

    /// Visited pixels.
    pub fn npxl(&self) -> usize {
        self.npxlx() * self.npxly()
    }

    /// Check that every visited pixel lies inside a `npxlx × npxly` frame.
    pub fn check_within(
        &self,
        index: usize,
        npxlx: usize,
        npxly: usize,
    ) -> Result<(), CalibrationError> {
        self.rows
            .check("row", npxly)
            .and_then(|_| self.cols.check("column", npxlx))
            .map_err(|reason| CalibrationError::RegionOutOfBounds { index, reason })
    }

    /// Absolute buffer positions of the visited pixels, row-major, for a
    /// camera whose frame starts at `base` and is `npxlx` pixels wide.
    pub fn pixel_indices(&self, npxlx: usize, base: usize) -> impl Iterator<Item = usize> + Clone {
        let cols = self.cols.indices();
        self.rows
            .indices()
            .flat_map(move |r| cols.clone().map(move |c| base + r * npxlx + c))
    }
}

// ─── Camera Layout ──────────────────────────────────────────────────

/// Frame sizes and buffer offsets of every camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraLayout {
    npxlx: Vec<usize>,
    npxly: Vec<usize>,
    nsub: Vec<usize>,
    npxl_cum: Vec<usize>,
    total_subaps: usize,
}

impl CameraLayout {
    /// Layout from per-camera widths, heights and subaperture counts.
    ///
    /// All three slices must have one entry per camera; negative entries
    /// are rejected.
    pub fn new(npxlx: &[i32], npxly: &[i32], nsub: &[i32]) -> Result<Self, ParamError> {
        let to_usize = |name: &'static str, v: &[i32]| -> Result<Vec<usize>, ParamError> {
            v.iter()
                .map(|&x| {
                    usize::try_from(x)
                        .map_err(|_| ParamError::invalid(name, format!("negative entry {x}")))
                })
                .collect()
        };
        let npxlx = to_usize("npxlx", npxlx)?;
        let npxly = to_usize("npxly", npxly)?;
        let nsub = to_usize("nsub", nsub)?;

        let mut npxl_cum = Vec::with_capacity(npxlx.len() + 1);
        npxl_cum.push(0);
        for (x, y) in npxlx.iter().zip(&npxly) {
            let prev = npxl_cum[npxl_cum.len() - 1];
            npxl_cum.push(prev + x * y);
        }
        let total_subaps = nsub.iter().sum();

        Ok(Self {
            npxlx,
            npxly,
            nsub,
            npxl_cum,
            total_subaps,
        })
    }

    /// Number of cameras.
    pub fn ncam(&self) -> usize {
        self.npxlx.len()
    }

    /// Width and height of camera `cam`.
    pub fn frame(&self, cam: usize) -> Option<(usize, usize)> {
        Some((*self.npxlx.get(cam)?, *self.npxly.get(cam)?))
    }

    /// Buffer offset of camera `cam`'s first pixel.
    pub fn offset(&self, cam: usize) -> usize {
        self.npxl_cum[cam.min(self.ncam())]
    }

    /// Subaperture count of camera `cam`.
    pub fn nsub(&self, cam: usize) -> usize {
        self.nsub.get(cam).copied().unwrap_or(0)
    }

    /// Pixels across all cameras.
    pub fn total_pixels(&self) -> usize {
        self.npxl_cum[self.ncam()]
    }

    /// Subapertures across all cameras.
    pub fn total_subaps(&self) -> usize {
        self.total_subaps
    }
}
