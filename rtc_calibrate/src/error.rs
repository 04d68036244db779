//! Calibration error type.

use rtc_common::ingest::ParamErrors;
use rtc_common::severity::{Classify, Severity};
use thiserror::Error;

/// Errors raised by the calibration engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalibrationError {
    /// The parameter set was rejected; the previous configuration is kept.
    #[error("calibration parameters rejected: {0}")]
    Params(#[from] ParamErrors),

    /// Engine opened with no worker threads.
    #[error("calibration engine needs at least one worker thread")]
    NoThreads,

    /// Camera index outside the configured layout.
    #[error("camera {cam} out of range (ncam {ncam})")]
    UnknownCamera {
        /// Requested camera.
        cam: usize,
        /// Configured camera count.
        ncam: usize,
    },

    /// Worker index outside the pool opened with.
    #[error("worker {thread} out of range (nthreads {nthreads})")]
    UnknownThread {
        /// Requested worker.
        thread: usize,
        /// Pool size.
        nthreads: usize,
    },

    /// No descriptor for this subaperture in the location table.
    #[error("subaperture {index} has no location entry")]
    UnknownSubap {
        /// Requested subaperture.
        index: usize,
    },

    /// Descriptor reaches outside its camera frame.
    #[error("subaperture {index} region invalid: {reason}")]
    RegionOutOfBounds {
        /// Offending subaperture.
        index: usize,
        /// What is wrong with it.
        reason: String,
    },

    /// A frame array is smaller than the configured layout needs.
    #[error("{name} holds {found} elements, layout needs {needed}")]
    ArrayTooShort {
        /// Which array.
        name: &'static str,
        /// Required length.
        needed: usize,
        /// Actual length.
        found: usize,
    },

    /// Growing a worker's scratch buffers failed.
    #[error("scratch growth to {requested} pixels failed on worker {thread}")]
    ScratchAlloc {
        /// Worker index.
        thread: usize,
        /// Requested pixel count.
        requested: usize,
    },
}

impl Classify for CalibrationError {
    fn severity(&self) -> Severity {
        match self {
            Self::ScratchAlloc { .. } => Severity::Fatal,
            _ => Severity::Recoverable,
        }
    }
}
