//! Calibration stages.
//!
//! Each stage works on one worker's scratch region. The per-pixel stage is
//! monomorphised over which of gain, offset and threshold are present, so
//! the inner loop carries no per-pixel presence checks; [`calibrate`]
//! selects one of the eight specialisations per call from
//! [`CalStages`].

use crate::config::{CalStages, CalibrationConfig};

/// Where extraction reads pixels from.
#[derive(Debug, Clone, Copy)]
pub enum PixelSource<'a> {
    /// Raw camera pixels.
    Raw(&'a [i16]),
    /// Configured synthetic frame.
    Fake(&'a [f32]),
}

/// Copy the pixels at `indices` into `out`.
pub fn extract(out: &mut [f32], source: PixelSource<'_>, indices: impl Iterator<Item = usize>) {
    match source {
        PixelSource::Raw(raw) => {
            for (dst, i) in out.iter_mut().zip(indices) {
                *dst = f32::from(raw[i]);
            }
        }
        PixelSource::Fake(fake) => {
            for (dst, i) in out.iter_mut().zip(indices) {
                *dst = fake[i];
            }
        }
    }
}

#[inline(always)]
fn calibrate_with<const GAIN: bool, const OFFSET: bool, const THRESHOLD: bool>(
    pixels: &mut [f32],
    indices: impl Iterator<Item = usize>,
    gain: &[f32],
    offset: &[f32],
    threshold: &[f32],
) {
    for (p, i) in pixels.iter_mut().zip(indices) {
        if GAIN {
            *p *= gain[i];
        }
        if OFFSET {
            *p -= offset[i];
        }
        if THRESHOLD && *p < threshold[i] {
            *p = 0.0;
        }
    }
}

/// Apply gain, offset and threshold, in that order, to `pixels`.
///
/// `indices` are the absolute positions of the pixels in the per-pixel
/// arrays.
pub fn calibrate(pixels: &mut [f32], indices: impl Iterator<Item = usize>, cfg: &CalibrationConfig) {
    let gain = cfg.gain.as_deref().unwrap_or(&[]);
    let offset = cfg.offset.as_deref().unwrap_or(&[]);
    let threshold = cfg.threshold.as_deref().unwrap_or(&[]);

    let s = cfg.stages();
    macro_rules! run {
        ($g:literal, $o:literal, $t:literal) => {
            calibrate_with::<$g, $o, $t>(pixels, indices, gain, offset, threshold)
        };
    }
    match (
        s.contains(CalStages::GAIN),
        s.contains(CalStages::OFFSET),
        s.contains(CalStages::THRESHOLD),
    ) {
        (true, true, true) => run!(true, true, true),
        (true, true, false) => run!(true, true, false),
        (true, false, true) => run!(true, false, true),
        (true, false, false) => run!(true, false, false),
        (false, true, true) => run!(false, true, true),
        (false, true, false) => run!(false, true, false),
        (false, false, true) => run!(false, false, true),
        (false, false, false) => {}
    }
}

/// Keep only the `|k|` brightest pixels.
///
/// The cutoff is the `|k|`-th largest value; pixels strictly below it are
/// zeroed. For negative `k` the survivors are also lowered by the next
/// distinct value below the cutoff (zero if there is none). `k == 0` or
/// `|k| >= pixels.len()` leaves the region untouched.
///
/// `sort` must be at least as long as `pixels`.
pub fn apply_brightest(pixels: &mut [f32], sort: &mut [f32], k: i32) {
    let n = pixels.len();
    let subtract = k < 0;
    let k = k.unsigned_abs() as usize;
    if k == 0 || k >= n {
        return;
    }

    let sort = &mut sort[..n];
    sort.copy_from_slice(pixels);
    sort.sort_unstable_by(f32::total_cmp);
    let cutoff = sort[n - k];

    if subtract {
        let floor = sort[..n - k]
            .iter()
            .rev()
            .find(|&&v| v != cutoff)
            .copied()
            .unwrap_or(0.0);
        for p in pixels.iter_mut() {
            if *p < cutoff {
                *p = 0.0;
            } else {
                *p -= floor;
            }
        }
    } else {
        for p in pixels.iter_mut() {
            if *p < cutoff {
                *p = 0.0;
            }
        }
    }
}

/// Raise every pixel to `exponent`. Exactly `1.0` is a no-op.
pub fn apply_power(pixels: &mut [f32], exponent: f32) {
    if exponent == 1.0 {
        return;
    }
    for p in pixels.iter_mut() {
        *p = p.powf(exponent);
    }
}
