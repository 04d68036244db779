//! Frame-tagged error reporting.
//!
//! Engines report configuration and dispatch problems to an [`ErrorSink`]
//! owned by the host. [`ErrorLog`] is a bounded in-memory sink backed by
//! fixed-capacity storage so reporting never allocates.

use std::sync::atomic::{AtomicU64, Ordering};

use heapless::{Deque, String};
use parking_lot::Mutex;
use tracing::error;

use crate::consts::{ERROR_LOG_DEPTH, ERROR_MESSAGE_LEN};

/// Destination for error messages.
pub trait ErrorSink: Send + Sync {
    /// Record `message` against `frame`.
    fn report(&self, frame: u32, message: &str);
}

/// One stored error.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRecord {
    /// Frame number at the time of the report.
    pub frame: u32,
    /// Message, truncated to [`ERROR_MESSAGE_LEN`] bytes.
    pub message: String<ERROR_MESSAGE_LEN>,
}

/// Bounded ring of the most recent errors.
///
/// Once full, the oldest record is dropped. [`ErrorLog::total`] keeps
/// counting every report.
pub struct ErrorLog {
    entries: Mutex<Deque<ErrorRecord, ERROR_LOG_DEPTH>>,
    total: AtomicU64,
}

impl ErrorLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Deque::new()),
            total: AtomicU64::new(0),
        }
    }

    /// Copy of the retained records, oldest first.
    pub fn records(&self) -> Vec<ErrorRecord> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Most recent record.
    pub fn latest(&self) -> Option<ErrorRecord> {
        self.entries.lock().back().cloned()
    }

    /// Number of reports since creation, including dropped ones.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Drop all retained records.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorSink for ErrorLog {
    fn report(&self, frame: u32, message: &str) {
        error!(frame, "{message}");
        self.total.fetch_add(1, Ordering::Relaxed);

        let mut text = String::new();
        for c in message.chars() {
            if text.push(c).is_err() {
                break;
            }
        }

        let mut entries = self.entries.lock();
        if entries.is_full() {
            entries.pop_front();
        }
        // Cannot fail: a slot was freed above.
        let _ = entries.push_back(ErrorRecord {
            frame,
            message: text,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_in_order() {
        let log = ErrorLog::new();
        log.report(1, "first");
        log.report(2, "second");
        let r = log.records();
        assert_eq!(r.len(), 2);
        assert_eq!(r[0].frame, 1);
        assert_eq!(log.latest().unwrap().message.as_str(), "second");
    }

    #[test]
    fn oldest_dropped_when_full() {
        let log = ErrorLog::new();
        for i in 0..(ERROR_LOG_DEPTH as u32 + 3) {
            log.report(i, "e");
        }
        let r = log.records();
        assert_eq!(r.len(), ERROR_LOG_DEPTH);
        assert_eq!(r[0].frame, 3);
        assert_eq!(log.total(), ERROR_LOG_DEPTH as u64 + 3);
    }

    #[test]
    fn long_message_truncated_on_char_boundary() {
        let log = ErrorLog::new();
        let msg = "é".repeat(ERROR_MESSAGE_LEN);
        log.report(0, &msg);
        let stored = log.latest().unwrap().message;
        assert_eq!(stored.len(), ERROR_MESSAGE_LEN);
        assert!(stored.chars().all(|c| c == 'é'));
    }

    #[test]
    fn clear_keeps_total() {
        let log = ErrorLog::new();
        log.report(0, "x");
        log.clear();
        assert!(log.records().is_empty());
        assert_eq!(log.total(), 1);
    }
}
