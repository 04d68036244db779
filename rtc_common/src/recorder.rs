//! Actuator value recording hook.
//!
//! The dispatch engine reshapes the recorder on every accepted
//! configuration and hands it every frame it queues for the hardware.

use std::collections::VecDeque;

use parking_lot::Mutex;
use thiserror::Error;

use crate::consts::DEFAULT_RECORDER_DEPTH;

/// Errors raised by a recorder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecorderError {
    /// The requested width cannot be stored.
    #[error("recorder cannot hold {requested} values per frame (limit {limit})")]
    TooWide {
        /// Requested values per frame.
        requested: usize,
        /// Largest supported width.
        limit: usize,
    },
}

/// Sink for per-frame actuator values.
pub trait ActuatorRecorder: Send + Sync {
    /// Prepare for frames of `width` values. Previously stored frames are discarded.
    fn reshape(&self, width: usize) -> Result<(), RecorderError>;

    /// Store one frame.
    fn record(&self, values: &[u16], timestamp: f64, frame: u32);
}

/// One stored frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedFrame {
    /// Frame number.
    pub frame: u32,
    /// Host timestamp in seconds.
    pub timestamp: f64,
    /// Values as written to the device.
    pub values: Vec<u16>,
}

struct RecorderState {
    width: usize,
    frames: VecDeque<RecordedFrame>,
}

/// Keeps the last `depth` frames in memory.
pub struct MemoryRecorder {
    depth: usize,
    max_width: usize,
    state: Mutex<RecorderState>,
}

impl MemoryRecorder {
    /// Recorder keeping `depth` frames of at most `max_width` values.
    pub fn new(depth: usize, max_width: usize) -> Self {
        Self {
            depth: depth.max(1),
            max_width,
            state: Mutex::new(RecorderState {
                width: 0,
                frames: VecDeque::with_capacity(depth.max(1)),
            }),
        }
    }

    /// Current frame width.
    pub fn width(&self) -> usize {
        self.state.lock().width
    }

    /// Copy of the stored frames, oldest first.
    pub fn frames(&self) -> Vec<RecordedFrame> {
        self.state.lock().frames.iter().cloned().collect()
    }

    /// Most recently stored frame.
    pub fn last(&self) -> Option<RecordedFrame> {
        self.state.lock().frames.back().cloned()
    }
}

impl Default for MemoryRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_RECORDER_DEPTH, u16::MAX as usize)
    }
}

impl ActuatorRecorder for MemoryRecorder {
    fn reshape(&self, width: usize) -> Result<(), RecorderError> {
        if width > self.max_width {
            return Err(RecorderError::TooWide {
                requested: width,
                limit: self.max_width,
            });
        }
        let mut state = self.state.lock();
        state.width = width;
        state.frames.clear();
        Ok(())
    }

    fn record(&self, values: &[u16], timestamp: f64, frame: u32) {
        let mut state = self.state.lock();
        let n = values.len().min(state.width);
        if state.frames.len() == self.depth {
            state.frames.pop_front();
        }
        state.frames.push_back(RecordedFrame {
            frame,
            timestamp,
            values: values[..n].to_vec(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reshape_clears_and_limits_width() {
        let rec = MemoryRecorder::new(4, 8);
        rec.reshape(3).unwrap();
        rec.record(&[1, 2, 3, 4], 0.5, 7);
        assert_eq!(rec.last().unwrap().values, vec![1, 2, 3]);
        rec.reshape(2).unwrap();
        assert!(rec.frames().is_empty());
        assert_eq!(
            rec.reshape(9),
            Err(RecorderError::TooWide { requested: 9, limit: 8 })
        );
        assert_eq!(rec.width(), 2);
    }

    #[test]
    fn depth_bounded() {
        let rec = MemoryRecorder::new(2, 8);
        rec.reshape(1).unwrap();
        for f in 0..5 {
            rec.record(&[f as u16], f as f64, f);
        }
        let frames = rec.frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].frame, 3);
        assert_eq!(frames[1].frame, 4);
    }
}
