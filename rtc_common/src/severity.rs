//! Recoverable vs. fatal error classification.
//!
//! A fatal error means the process can no longer guarantee the state of
//! the hardware it drives (a DAC write failed mid-frame, scratch memory
//! could not be obtained). Such errors are logged and the process aborts.
//! Everything else is returned to the caller.

use tracing::error;

/// How an error must be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Report and continue; the engine state is still consistent.
    Recoverable,
    /// Log and abort the process.
    Fatal,
}

/// Errors that know their own severity.
pub trait Classify {
    /// Severity of this error.
    fn severity(&self) -> Severity;

    /// Shorthand for `severity() == Severity::Fatal`.
    fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

/// Log `err` and abort the process.
#[cold]
pub fn escalate(err: &dyn std::error::Error) -> ! {
    error!(error = %err, "fatal error, aborting");
    std::process::abort()
}

/// Pass `result` through, escalating if it holds a fatal error.
#[inline]
pub fn triage<T, E>(result: Result<T, E>) -> Result<T, E>
where
    E: Classify + std::error::Error,
{
    match result {
        Err(e) if e.is_fatal() => escalate(&e),
        other => other,
    }
}
