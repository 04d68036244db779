//! RTC Common Library
//!
//! Shared plumbing for the real-time control engines: the named parameter
//! store and its typed ingestion, the error sink, the actuator recorder
//! seam, real-time thread policy and the fatal/recoverable error split.
//!
//! # Module Structure
//!
//! - [`param`] - Typed parameter values, the [`param::ParamSource`] trait and a TOML-backed store
//! - [`ingest`] - Required/optional parameter fetch with shape and dtype checks
//! - [`error_sink`] - Frame-tagged error reporting
//! - [`recorder`] - Actuator value recording hook
//! - [`rt`] - CPU affinity, scheduler priority and absolute-time sleeping
//! - [`severity`] - Recoverable vs. fatal classification and escalation
//! - [`config`] - TOML configuration loading and the shared logging table
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use rtc_common::prelude::*;
//!
//! let mut params = ParamBuffer::new();
//! params.set("nacts", 4);
//! let set = ParamSet::fetch(&params, &["nacts"], &[]).unwrap();
//! assert_eq!(set.scalar_i32("nacts").unwrap(), 4);
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod consts;
pub mod error_sink;
pub mod ingest;
pub mod param;
pub mod prelude;
pub mod recorder;
pub mod rt;
pub mod severity;
