//! Analog-output DAC driver interface.
//!
//! This module defines:
//! - `DacDriver` trait - interface for pluggable DAC backends
//! - `DacError` enum - error types for driver calls
//! - `AdapterInfo` - what the board reports about itself
//!
//! The dispatch engine never talks to a driver directly; it goes through a
//! [`DacSession`], which owns the acquisition state machine.

pub mod session;
pub mod simulated;

pub use session::{DacSession, SessionState};
pub use simulated::{DacProbe, FailOn, SimulatedDac};

use rtc_common::severity::{Classify, Severity};
use serde::Deserialize;
use thiserror::Error;

/// Error types for DAC operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DacError {
    /// Adapter information could not be read.
    #[error("adapter query failed: {0}")]
    AdapterInfo(String),

    /// The analog-output subsystem could not be acquired.
    #[error("subsystem acquire failed: {0}")]
    Acquire(String),

    /// Output configuration was refused.
    #[error("output configuration failed: {0}")]
    Configure(String),

    /// Software trigger was refused.
    #[error("software trigger failed: {0}")]
    Trigger(String),

    /// Output reset failed.
    #[error("output reset failed: {0}")]
    Reset(String),

    /// Channel register write failed.
    #[error("channel {channel} write failed: {reason}")]
    Write {
        /// Hardware channel.
        channel: u16,
        /// Driver error text.
        reason: String,
    },

    /// Subsystem release failed.
    #[error("subsystem release failed: {0}")]
    Release(String),

    /// Write attempted outside the running state.
    #[error("session is {0:?}, not running")]
    NotRunning(SessionState),
}

impl Classify for DacError {
    /// Once the board is running, a failed write, reset or release leaves
    /// its outputs in an unknown state.
    fn severity(&self) -> Severity {
        match self {
            Self::Write { .. } | Self::Reset(_) | Self::Release(_) => Severity::Fatal,
            _ => Severity::Recoverable,
        }
    }
}

/// Board family, as reported by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterModel {
    /// 32-channel analog output board. Needs an extra AO32 reset after
    /// every output reset.
    Pd2Ao,
    /// Any other board.
    Other,
}

/// Static adapter information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    /// Board family.
    pub model: AdapterModel,
    /// Serial number.
    pub serial: u32,
    /// Analog output channels.
    pub channels: u16,
}

impl AdapterInfo {
    /// True when the board needs the AO32 reset.
    pub fn needs_ao32_reset(&self) -> bool {
        self.model == AdapterModel::Pd2Ao
    }
}

/// Trait defining the interface for DAC drivers.
///
/// # Lifecycle
///
/// 1. `adapter_info()` and `acquire()` - claim the board
/// 2. `reset_output()`, `set_config()`, `start_trigger()` - arm it
/// 3. `write_channel()` - called from the dispatch thread only
/// 4. `reset_output()`, `release()` - give it back
///
/// All calls for one board are issued from one thread at a time.
pub trait DacDriver: Send {
    /// Driver identifier (e.g. "simulated").
    fn name(&self) -> &'static str;

    /// Read adapter information.
    fn adapter_info(&mut self) -> Result<AdapterInfo, DacError>;

    /// Acquire the analog-output subsystem.
    fn acquire(&mut self) -> Result<(), DacError>;

    /// Release the analog-output subsystem.
    fn release(&mut self) -> Result<(), DacError>;

    /// Reset all analog outputs.
    fn reset_output(&mut self) -> Result<(), DacError>;

    /// Board-specific AO32 reset.
    fn reset_ao32(&mut self) -> Result<(), DacError>;

    /// Apply the output configuration.
    fn set_config(&mut self) -> Result<(), DacError>;

    /// Start the software trigger.
    fn start_trigger(&mut self) -> Result<(), DacError>;

    /// Write one 16-bit value to `channel`.
    fn write_channel(&mut self, channel: u16, value: u16) -> Result<(), DacError>;
}
