//! Prelude module for common re-exports.
//!
//! ```rust
//! use rtc_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, LoggingConfig};

// ─── Parameters ─────────────────────────────────────────────────────
pub use crate::ingest::{Expect, ParamError, ParamErrors, ParamSet, UpdateOutcome};
pub use crate::param::{DType, ParamBuffer, ParamSource, ParamValue};

// ─── Reporting ──────────────────────────────────────────────────────
pub use crate::error_sink::{ErrorLog, ErrorSink};
pub use crate::recorder::{ActuatorRecorder, MemoryRecorder};
pub use crate::severity::{Classify, Severity};

// ─── Real-Time ──────────────────────────────────────────────────────
pub use crate::rt::{AbsoluteTimer, RtError, RtPolicy};
