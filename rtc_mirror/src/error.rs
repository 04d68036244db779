//! Dispatch engine error type.

use rtc_common::ingest::ParamErrors;
use rtc_common::recorder::RecorderError;
use rtc_common::severity::{Classify, Severity};
use thiserror::Error;

use crate::args::ArgsError;
use crate::dac::DacError;
use crate::socket::SinkError;

/// Errors raised by the dispatch engine.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// Open arguments could not be decoded.
    #[error("bad open arguments: {0}")]
    Args(#[from] ArgsError),

    /// Float output was requested.
    #[error("float output is not supported")]
    FloatOutput,

    /// The parameter set was rejected.
    #[error("mirror parameters rejected: {0}")]
    Params(#[from] ParamErrors),

    /// The DAC could not be brought up; it has been released again.
    #[error("DAC open failed: {0}")]
    Dac(#[source] DacError),

    /// The socket could not be opened.
    #[error("actuator socket: {0}")]
    Sink(#[from] SinkError),

    /// The recorder cannot hold frames of this width.
    #[error("actuator recorder: {0}")]
    Recorder(#[from] RecorderError),

    /// The dispatch thread could not be started.
    #[error("cannot spawn dispatch thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// Demand vector of the wrong length.
    #[error("demand has {found} values, expected {expected}")]
    DemandLength {
        /// Configured `nacts`.
        expected: usize,
        /// Values given.
        found: usize,
    },

    /// The caller flagged an earlier error for this frame.
    #[error("frame {0} skipped: upstream error")]
    Upstream(u32),

    /// The engine is closed.
    #[error("mirror engine is closed")]
    Closed,

    /// The previous frame did not reach the socket. The new frame was
    /// still queued.
    #[error("previous frame failed to send; frame {frame} queued")]
    PreviousSendFailed {
        /// Frame that was queued.
        frame: u32,
    },
}

impl Classify for MirrorError {
    fn severity(&self) -> Severity {
        Severity::Recoverable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_failures_are_recoverable() {
        let e = MirrorError::Dac(DacError::Acquire("busy".into()));
        assert!(!e.is_fatal());
        assert_eq!(e.to_string(), "DAC open failed: subsystem acquire failed: busy");
    }
}
