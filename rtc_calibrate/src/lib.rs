//! Pixel calibration engine.
//!
//! Conditions raw wavefront-sensor pixels one subaperture at a time:
//! extract → gain/offset/threshold → brightest-K selection → power law →
//! store back into the shared corrected-pixel buffer.
//!
//! The host owns a pool of worker threads and assigns each of them a
//! disjoint set of subapertures per frame. Every worker calls
//! [`CalibrationEngine::process_subap`] with its own thread index; the
//! engine keeps one [`scratch::WorkerScratch`] per index.
//!
//! # Modules
//!
//! - [`geometry`] - Subaperture descriptors and camera layout
//! - [`config`] - Validated calibration snapshot built from the parameter store
//! - [`scratch`] - Per-worker pixel and sort buffers
//! - [`pipeline`] - The calibration stages
//! - [`store`] - Shared corrected-pixel output buffer
//! - [`engine`] - Engine facade: open, reconfigure, process, close

#![warn(missing_docs)]

pub mod config;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod pipeline;
pub mod scratch;
pub mod store;

pub use config::{Brightest, CalStages, CalibrationConfig, ThresholdAlgo};
pub use engine::{CalibrationEngine, FrameArrays, SubapView};
pub use error::CalibrationError;
pub use geometry::{CameraLayout, Stride, SubapertureDescriptor};
pub use store::CalibratedPixels;
