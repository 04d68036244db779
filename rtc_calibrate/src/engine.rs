//! Calibration engine facade.
//!
//! ## Lifecycle
//! 1. [`CalibrationEngine::open`] validates the initial parameters and
//!    allocates one scratch slot per worker.
//! 2. Workers call [`CalibrationEngine::process_subap`] once per assigned
//!    subaperture per frame.
//! 3. [`CalibrationEngine::new_param`] installs a new snapshot between (or
//!    during) frames.
//! 4. [`CalibrationEngine::close`] releases everything.
//!
//! ## Snapshot access
//! Each `process_subap` call takes the read lock just long enough to clone
//! the active `Arc<CalibrationConfig>` and then works from that clone, so
//! a concurrent update never mixes two configurations within one region.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use rtc_common::error_sink::ErrorSink;
use rtc_common::ingest::{self, ParamErrors, UpdateOutcome};
use rtc_common::param::ParamSource;
use rtc_common::severity::triage;
use tracing::{debug, info};

use crate::config::CalibrationConfig;
use crate::error::CalibrationError;
use crate::geometry::SubapertureDescriptor;
use crate::pipeline::{self, PixelSource};
use crate::scratch::WorkerScratch;
use crate::store::CalibratedPixels;

const CONTEXT: &str = "calibrate";

/// Frame-level arrays shared by all workers.
#[derive(Clone, Copy)]
pub struct FrameArrays<'a> {
    /// Raw pixels of every camera, back to back.
    pub pixels: &'a [i16],
    /// Six words per subaperture, see [`SubapertureDescriptor`].
    pub subap_location: &'a [i32],
    /// Corrected-pixel output.
    pub calibrated: &'a CalibratedPixels,
}

/// Processed region, borrowed from the worker's scratch.
///
/// Holds the worker slot until dropped.
pub struct SubapView<'a> {
    scratch: MutexGuard<'a, WorkerScratch>,
}

impl SubapView<'_> {
    /// Corrected pixels of the region, row-major.
    pub fn pixels(&self) -> &[f32] {
        self.scratch.pixels()
    }

    /// Region width.
    pub fn npxlx(&self) -> usize {
        self.scratch.npxlx()
    }

    /// Region height.
    pub fn npxly(&self) -> usize {
        self.scratch.npxly()
    }

    /// Scratch capacity in pixels.
    pub fn capacity(&self) -> usize {
        self.scratch.capacity()
    }
}

/// Per-subaperture pixel calibration engine.
pub struct CalibrationEngine {
    active: RwLock<Arc<CalibrationConfig>>,
    update: Mutex<()>,
    workers: Box<[Mutex<WorkerScratch>]>,
    errors: Arc<dyn ErrorSink>,
}

impl CalibrationEngine {
    /// Validate `params` and create an engine with `nthreads` worker slots.
    pub fn open(
        params: &dyn ParamSource,
        errors: Arc<dyn ErrorSink>,
        nthreads: usize,
        frame_no: u32,
    ) -> Result<Self, CalibrationError> {
        if nthreads == 0 {
            return Err(CalibrationError::NoThreads);
        }
        let (config, warnings) = match CalibrationConfig::from_params(params) {
            Ok(ok) => ok,
            Err(errs) => {
                ingest::report(errors.as_ref(), frame_no, CONTEXT, errs.iter());
                return Err(errs.into());
            }
        };
        ingest::report(errors.as_ref(), frame_no, CONTEXT, &warnings);

        info!(
            nthreads,
            ncam = config.layout.ncam(),
            npxl = config.layout.total_pixels(),
            nsubaps = config.layout.total_subaps(),
            "calibration engine opened"
        );

        Ok(Self {
            active: RwLock::new(Arc::new(config)),
            update: Mutex::new(()),
            workers: (0..nthreads).map(|_| Mutex::new(WorkerScratch::new())).collect(),
            errors,
        })
    }

    /// Re-read parameters and install a new snapshot.
    ///
    /// On rejection the previous snapshot stays active.
    pub fn new_param(
        &self,
        params: &dyn ParamSource,
        frame_no: u32,
    ) -> Result<UpdateOutcome, ParamErrors> {
        let _serial = self.update.lock();
        match CalibrationConfig::from_params(params) {
            Ok((config, warnings)) => {
                ingest::report(self.errors.as_ref(), frame_no, CONTEXT, &warnings);
                debug!(frame_no, stages = ?config.stages(), "calibration snapshot installed");
                *self.active.write() = Arc::new(config);
                Ok(UpdateOutcome::from_warnings(warnings))
            }
            Err(errs) => {
                ingest::report(self.errors.as_ref(), frame_no, CONTEXT, errs.iter());
                Err(errs)
            }
        }
    }

    /// The active snapshot.
    pub fn config(&self) -> Arc<CalibrationConfig> {
        Arc::clone(&*self.active.read())
    }

    /// Worker slots.
    pub fn nthreads(&self) -> usize {
        self.workers.len()
    }

    /// Run the pipeline on subaperture `subap_index` of camera `cam`.
    ///
    /// Writes the result into `arrays.calibrated` and returns a view of the
    /// worker's scratch. A scratch allocation failure aborts the process.
    pub fn process_subap<'e>(
        &'e self,
        arrays: &FrameArrays<'_>,
        cam: usize,
        thread_no: usize,
        subap_index: usize,
    ) -> Result<SubapView<'e>, CalibrationError> {
        let cfg = self.config();
        let layout = &cfg.layout;

        let (npxlx, npxly) = layout.frame(cam).ok_or(CalibrationError::UnknownCamera {
            cam,
            ncam: layout.ncam(),
        })?;
        let worker = self
            .workers
            .get(thread_no)
            .ok_or(CalibrationError::UnknownThread {
                thread: thread_no,
                nthreads: self.workers.len(),
            })?;
        let desc = SubapertureDescriptor::from_table(arrays.subap_location, subap_index)
            .ok_or(CalibrationError::UnknownSubap { index: subap_index })?;
        desc.check_within(subap_index, npxlx, npxly)?;

        let needed = layout.total_pixels();
        let source = match &cfg.fake_image {
            Some(fake) => PixelSource::Fake(fake),
            None => {
                check_len("pixels", needed, arrays.pixels.len())?;
                PixelSource::Raw(arrays.pixels)
            }
        };
        check_len("calibrated", needed, arrays.calibrated.len())?;

        let base = layout.offset(cam);
        let indices = desc.pixel_indices(npxlx, base);

        let mut scratch = worker.lock();
        triage(scratch.prepare(thread_no, desc.npxlx(), desc.npxly()))?;
        {
            let (pixels, sort) = scratch.split_mut();
            pipeline::extract(pixels, source, indices.clone());
            pipeline::calibrate(pixels, indices.clone(), &cfg);
            pipeline::apply_brightest(pixels, sort, cfg.brightest.for_subap(subap_index));
            pipeline::apply_power(pixels, cfg.power);
            arrays.calibrated.write_region(indices, pixels);
        }

        Ok(SubapView { scratch })
    }

    /// Release all worker scratch and the active snapshot.
    pub fn close(self) {
        let capacity: usize = self.workers.iter().map(|w| w.lock().capacity()).sum();
        info!(
            nthreads = self.workers.len(),
            scratch_pixels = capacity,
            "calibration engine closed"
        );
    }
}

fn check_len(name: &'static str, needed: usize, found: usize) -> Result<(), CalibrationError> {
    if found < needed {
        return Err(CalibrationError::ArrayTooShort {
            name,
            needed,
            found,
        });
    }
    Ok(())
}
