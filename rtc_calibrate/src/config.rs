//! Calibration configuration snapshot.
//!
//! A [`CalibrationConfig`] is built from the parameter store on every
//! update and installed whole. Per-pixel arrays are shared with the store
//! through `Arc`, so an installed snapshot keeps them alive for as long as
//! any in-flight frame still holds it.

use std::sync::Arc;

use bitflags::bitflags;
use rtc_common::ingest::{Expect, ParamError, ParamErrors, ParamSet};
use rtc_common::param::ParamSource;

use crate::geometry::CameraLayout;

/// Parameter names read by the calibration engine.
pub mod names {
    /// Per-pixel gain.
    pub const CALMULT: &str = "calmult";
    /// Per-pixel offset.
    pub const CALSUB: &str = "calsub";
    /// Per-pixel threshold.
    pub const CALTHR: &str = "calthr";
    /// Synthetic frame used instead of camera pixels.
    pub const FAKE_CCD_IMAGE: &str = "fakeCCDImage";
    /// Camera count.
    pub const NCAM: &str = "ncam";
    /// Worker threads per camera.
    pub const NCAM_THREADS: &str = "ncamThreads";
    /// Frame width per camera.
    pub const NPXLX: &str = "npxlx";
    /// Frame height per camera.
    pub const NPXLY: &str = "npxly";
    /// Subapertures per camera.
    pub const NSUB: &str = "nsub";
    /// Power-law exponent.
    pub const POWER_FACTOR: &str = "powerFactor";
    /// Threshold algorithm selector.
    pub const THRESHOLD_ALGO: &str = "thresholdAlgo";
    /// Brightest-K selector.
    pub const USE_BRIGHTEST: &str = "useBrightest";

    /// Every name, all required.
    pub const ALL: [&str; 12] = [
        CALMULT,
        CALSUB,
        CALTHR,
        FAKE_CCD_IMAGE,
        NCAM,
        NCAM_THREADS,
        NPXLX,
        NPXLY,
        NSUB,
        POWER_FACTOR,
        THRESHOLD_ALGO,
        USE_BRIGHTEST,
    ];
}

/// Thresholding mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThresholdAlgo {
    /// No thresholding.
    #[default]
    None,
    /// Zero pixels below their threshold.
    ThresholdOnly,
    /// Zero pixels below their threshold; downstream stages additionally
    /// clip against it. Identical to `ThresholdOnly` at this stage.
    ThresholdAndClip,
}

impl ThresholdAlgo {
    /// True for both thresholding modes.
    pub fn is_active(self) -> bool {
        !matches!(self, Self::None)
    }
}

impl TryFrom<i32> for ThresholdAlgo {
    type Error = ParamError;

    fn try_from(v: i32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::None),
            1 => Ok(Self::ThresholdOnly),
            2 => Ok(Self::ThresholdAndClip),
            other => Err(ParamError::invalid(
                names::THRESHOLD_ALGO,
                format!("unknown algorithm {other} (expected 0, 1 or 2)"),
            )),
        }
    }
}

/// Brightest-pixel selection.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Brightest {
    /// Keep every pixel.
    #[default]
    Disabled,
    /// Same K for every subaperture.
    Global(i32),
    /// One K per subaperture, indexed by global subaperture number.
    PerSubap(Arc<[i32]>),
}

impl Brightest {
    /// K for subaperture `index`. Zero disables selection.
    pub fn for_subap(&self, index: usize) -> i32 {
        match self {
            Self::Disabled => 0,
            Self::Global(k) => *k,
            Self::PerSubap(ks) => ks.get(index).copied().unwrap_or(0),
        }
    }
}

bitflags! {
    /// Per-pixel stages that are active for the current snapshot.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CalStages: u8 {
        /// Multiply by gain.
        const GAIN = 1 << 0;
        /// Subtract offset.
        const OFFSET = 1 << 1;
        /// Zero below threshold.
        const THRESHOLD = 1 << 2;
    }
}

/// Validated calibration state.
#[derive(Debug, Clone)]
pub struct CalibrationConfig {
    /// Camera frame sizes and offsets.
    pub layout: CameraLayout,
    /// Worker threads per camera.
    pub ncam_threads: Arc<[i32]>,
    /// Per-pixel gain.
    pub gain: Option<Arc<[f32]>>,
    /// Per-pixel offset.
    pub offset: Option<Arc<[f32]>>,
    /// Per-pixel threshold.
    pub threshold: Option<Arc<[f32]>>,
    /// Synthetic frame used instead of camera pixels.
    pub fake_image: Option<Arc<[f32]>>,
    /// Brightest-K selection.
    pub brightest: Brightest,
    /// Power-law exponent.
    pub power: f32,
    /// Thresholding mode.
    pub threshold_algo: ThresholdAlgo,
}

impl CalibrationConfig {
    /// Build a snapshot from `source`.
    ///
    /// On success returns the snapshot and the fields that were disabled
    /// because their value was unusable. Structural errors reject the
    /// whole update.
    pub fn from_params(source: &dyn ParamSource) -> Result<(Self, Vec<ParamError>), ParamErrors> {
        use names::*;

        let set = ParamSet::fetch(source, &ALL, &[])?;
        let mut errors = ParamErrors::default();
        let mut warnings = Vec::new();

        let ncam = match set.scalar_i32(NCAM) {
            Ok(n) if n > 0 => n as usize,
            Ok(n) => return Err(ParamError::invalid(NCAM, format!("{n} cameras")).into()),
            Err(e) => return Err(e.into()),
        };

        let per_cam = |name: &'static str| -> Result<Arc<[i32]>, ParamError> {
            set.ints(name, Expect::Exactly(ncam))?
                .ok_or(ParamError::WrongSize {
                    name,
                    expected: Expect::Exactly(ncam),
                    found: 0,
                })
        };
        let nsub = per_cam(NSUB);
        let npxlx = per_cam(NPXLX);
        let npxly = per_cam(NPXLY);
        let ncam_threads = per_cam(NCAM_THREADS).map_err(|e| errors.push(e)).ok();

        let layout = match (nsub, npxlx, npxly) {
            (Ok(nsub), Ok(x), Ok(y)) => CameraLayout::new(&x, &y, &nsub)
                .map_err(|e| errors.push(e))
                .ok(),
            (a, b, c) => {
                errors.0.extend([a.err(), b.err(), c.err()].into_iter().flatten());
                None
            }
        };

        let power = set.scalar_f32(POWER_FACTOR).map_err(|e| errors.push(e)).ok();
        let threshold_algo = set
            .scalar_i32(THRESHOLD_ALGO)
            .and_then(ThresholdAlgo::try_from)
            .map_err(|e| errors.push(e))
            .ok();

        let Some(layout) = layout else {
            return Err(errors);
        };
        let npxl = Expect::Exactly(layout.total_pixels());

        let mut per_pixel = |name: &'static str| match set.floats(name, npxl) {
            Ok(v) => v,
            Err(e) => {
                errors.push(e);
                None
            }
        };
        let gain = per_pixel(CALMULT);
        let offset = per_pixel(CALSUB);
        let threshold = per_pixel(CALTHR);

        let fake_image = set.floats(FAKE_CCD_IMAGE, npxl).unwrap_or_else(|e| {
            warnings.push(e);
            None
        });

        let brightest = match set.ints(USE_BRIGHTEST, Expect::Any) {
            Ok(None) => Brightest::Disabled,
            Ok(Some(ks)) if ks.len() == 1 => match ks[0] {
                0 => Brightest::Disabled,
                k => Brightest::Global(k),
            },
            Ok(Some(ks)) if ks.len() == layout.total_subaps() => Brightest::PerSubap(ks),
            Ok(Some(ks)) => {
                warnings.push(ParamError::WrongSize {
                    name: USE_BRIGHTEST,
                    expected: Expect::Exactly(layout.total_subaps()),
                    found: ks.len(),
                });
                Brightest::Disabled
            }
            Err(e) => {
                warnings.push(e);
                Brightest::Disabled
            }
        };

        match (ncam_threads, power, threshold_algo) {
            (Some(ncam_threads), Some(power), Some(threshold_algo)) if errors.is_empty() => Ok((
                Self {
                    layout,
                    ncam_threads,
                    gain,
                    offset,
                    threshold,
                    fake_image,
                    brightest,
                    power,
                    threshold_algo,
                },
                warnings,
            )),
            _ => Err(errors),
        }
    }

    /// Per-pixel stages to run.
    ///
    /// Thresholding needs both an active algorithm and a threshold array.
    pub fn stages(&self) -> CalStages {
        let mut s = CalStages::empty();
        s.set(CalStages::GAIN, self.gain.is_some());
        s.set(CalStages::OFFSET, self.offset.is_some());
        s.set(
            CalStages::THRESHOLD,
            self.threshold.is_some() && self.threshold_algo.is_active(),
        );
        s
    }
}
