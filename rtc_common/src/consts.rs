//! System-wide constants shared by the engines.

/// Number of error records retained by [`crate::error_sink::ErrorLog`].
pub const ERROR_LOG_DEPTH: usize = 64;

/// Maximum stored length of a single error message, in bytes.
///
/// Longer messages are truncated at a character boundary.
pub const ERROR_MESSAGE_LEN: usize = 160;

/// Default number of frames kept by [`crate::recorder::MemoryRecorder`].
pub const DEFAULT_RECORDER_DEPTH: usize = 256;

/// Nanoseconds per second.
pub const NSEC_PER_SEC: i64 = 1_000_000_000;
