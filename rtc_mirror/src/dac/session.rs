//! DAC acquisition state machine.
//!
//! ## States
//! `Closed → Unconfigured → Configured → Running` on open, and the reverse
//! path on close. A failure anywhere on the way up unwinds back to
//! `Closed` before the error is returned, so a session that exists is
//! always `Running` until [`DacSession::close`].

use tracing::{debug, info, warn};

use super::{AdapterInfo, DacDriver, DacError};

/// Acquisition state of one board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Subsystem not held.
    Closed,
    /// Subsystem held, outputs reset.
    Unconfigured,
    /// Output configuration applied.
    Configured,
    /// Trigger started; channel writes allowed.
    Running,
}

/// An acquired, running DAC.
pub struct DacSession {
    driver: Box<dyn DacDriver>,
    state: SessionState,
    info: Option<AdapterInfo>,
}

impl DacSession {
    /// Acquire, configure and trigger the board behind `driver`.
    ///
    /// On failure every step already taken is undone.
    pub fn open(driver: Box<dyn DacDriver>) -> Result<Self, DacError> {
        let mut session = Self {
            driver,
            state: SessionState::Closed,
            info: None,
        };
        if let Err(e) = session.bring_up() {
            warn!(driver = session.driver.name(), state = ?session.state, "DAC open failed: {e}");
            if let Err(unwind) = session.tear_down() {
                warn!("DAC unwind after failed open: {unwind}");
            }
            return Err(e);
        }
        info!(
            driver = session.driver.name(),
            channels = session.channels(),
            "DAC session running"
        );
        Ok(session)
    }

    fn bring_up(&mut self) -> Result<(), DacError> {
        let info = self.driver.adapter_info()?;
        debug!(model = ?info.model, serial = info.serial, "adapter found");
        self.info = Some(info);

        self.driver.acquire()?;
        self.state = SessionState::Unconfigured;
        self.reset()?;

        self.driver.set_config()?;
        self.state = SessionState::Configured;

        self.driver.start_trigger()?;
        self.state = SessionState::Running;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), DacError> {
        self.driver.reset_output()?;
        if self.info.as_ref().is_some_and(AdapterInfo::needs_ao32_reset) {
            self.driver.reset_ao32()?;
        }
        Ok(())
    }

    /// Walk back to `Closed`, attempting every step even if one fails.
    /// Returns the first failure.
    fn tear_down(&mut self) -> Result<(), DacError> {
        let mut first = None;
        if self.state == SessionState::Running {
            self.state = SessionState::Configured;
        }
        if self.state == SessionState::Configured {
            if let Err(e) = self.reset() {
                first.get_or_insert(e);
            }
            self.state = SessionState::Unconfigured;
        }
        if self.state == SessionState::Unconfigured {
            if let Err(e) = self.driver.release() {
                first.get_or_insert(e);
            }
            self.state = SessionState::Closed;
        }
        first.map_or(Ok(()), Err)
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Adapter information read at open.
    pub fn info(&self) -> Option<&AdapterInfo> {
        self.info.as_ref()
    }

    /// Analog output channels on the board.
    pub fn channels(&self) -> usize {
        self.info.as_ref().map_or(0, |i| usize::from(i.channels))
    }

    /// Write `value` to `channel`.
    #[inline]
    pub fn write(&mut self, channel: u16, value: u16) -> Result<(), DacError> {
        if self.state != SessionState::Running {
            return Err(DacError::NotRunning(self.state));
        }
        self.driver.write_channel(channel, value)
    }

    /// Reset outputs and release the board.
    ///
    /// The session ends `Closed` whether or not a step failed.
    pub fn close(mut self) -> Result<(), DacError> {
        let result = self.tear_down();
        info!(driver = self.driver.name(), "DAC session closed");
        result
    }
}

impl Drop for DacSession {
    fn drop(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if let Err(e) = self.tear_down() {
            warn!("DAC teardown on drop: {e}");
        }
    }
}
