//! Simulated DAC driver.
//!
//! Keeps channel registers in memory and records every write, so the
//! dispatch engine can run end to end without hardware. A [`DacProbe`]
//! shares the driver's state with tests and the harness: it inspects
//! what was written, injects failures, and waits for the dispatch thread
//! to catch up.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bitflags::bitflags;
use parking_lot::{Condvar, Mutex};
use tracing::debug;

use super::{AdapterInfo, AdapterModel, DacDriver, DacError};

bitflags! {
    /// Driver calls that should fail.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FailOn: u8 {
        /// `adapter_info`.
        const ADAPTER_INFO = 1 << 0;
        /// `acquire`.
        const ACQUIRE = 1 << 1;
        /// `set_config`.
        const CONFIGURE = 1 << 2;
        /// `start_trigger`.
        const TRIGGER = 1 << 3;
        /// `reset_output` and `reset_ao32`.
        const RESET = 1 << 4;
        /// `write_channel`.
        const WRITE = 1 << 5;
        /// `release`.
        const RELEASE = 1 << 6;
    }
}

#[derive(Debug, Default)]
struct SimState {
    acquired: bool,
    triggered: bool,
    registers: Vec<u16>,
    writes: Vec<(u16, u16)>,
    resets: u32,
    ao32_resets: u32,
    fail: FailOn,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<SimState>,
    written: Condvar,
}

/// In-memory DAC.
pub struct SimulatedDac {
    info: AdapterInfo,
    shared: Arc<Shared>,
}

impl SimulatedDac {
    /// Board of the given model with `channels` outputs.
    pub fn new(model: AdapterModel, channels: u16) -> Self {
        let shared = Arc::new(Shared::default());
        shared.state.lock().registers = vec![0; usize::from(channels)];
        Self {
            info: AdapterInfo {
                model,
                serial: 0x5151,
                channels,
            },
            shared,
        }
    }

    /// Handle onto this board's state.
    pub fn probe(&self) -> DacProbe {
        DacProbe {
            shared: Arc::clone(&self.shared),
        }
    }

    fn check(&self, op: FailOn) -> Result<(), String> {
        if self.shared.state.lock().fail.contains(op) {
            Err(format!("injected {op:?} failure"))
        } else {
            Ok(())
        }
    }
}

impl DacDriver for SimulatedDac {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn adapter_info(&mut self) -> Result<AdapterInfo, DacError> {
        self.check(FailOn::ADAPTER_INFO).map_err(DacError::AdapterInfo)?;
        Ok(self.info.clone())
    }

    fn acquire(&mut self) -> Result<(), DacError> {
        self.check(FailOn::ACQUIRE).map_err(DacError::Acquire)?;
        self.shared.state.lock().acquired = true;
        Ok(())
    }

    fn release(&mut self) -> Result<(), DacError> {
        let mut st = self.shared.state.lock();
        st.acquired = false;
        st.triggered = false;
        if st.fail.contains(FailOn::RELEASE) {
            return Err(DacError::Release("injected release failure".into()));
        }
        Ok(())
    }

    fn reset_output(&mut self) -> Result<(), DacError> {
        self.check(FailOn::RESET).map_err(DacError::Reset)?;
        let mut st = self.shared.state.lock();
        st.resets += 1;
        st.registers.fill(0);
        Ok(())
    }

    fn reset_ao32(&mut self) -> Result<(), DacError> {
        self.check(FailOn::RESET).map_err(DacError::Reset)?;
        self.shared.state.lock().ao32_resets += 1;
        Ok(())
    }

    fn set_config(&mut self) -> Result<(), DacError> {
        self.check(FailOn::CONFIGURE).map_err(DacError::Configure)
    }

    fn start_trigger(&mut self) -> Result<(), DacError> {
        self.check(FailOn::TRIGGER).map_err(DacError::Trigger)?;
        self.shared.state.lock().triggered = true;
        Ok(())
    }

    fn write_channel(&mut self, channel: u16, value: u16) -> Result<(), DacError> {
        let mut st = self.shared.state.lock();
        if st.fail.contains(FailOn::WRITE) {
            return Err(DacError::Write {
                channel,
                reason: "injected write failure".into(),
            });
        }
        let Some(reg) = st.registers.get_mut(usize::from(channel)) else {
            return Err(DacError::Write {
                channel,
                reason: "no such channel".into(),
            });
        };
        *reg = value;
        st.writes.push((channel, value));
        drop(st);
        self.shared.written.notify_all();
        Ok(())
    }
}

// ─── Probe ──────────────────────────────────────────────────────────

/// Shared view of a [`SimulatedDac`].
#[derive(Clone)]
pub struct DacProbe {
    shared: Arc<Shared>,
}

impl DacProbe {
    /// Make the given calls fail from now on.
    pub fn fail_on(&self, ops: FailOn) {
        debug!(?ops, "simulated DAC failure injected");
        self.shared.state.lock().fail.insert(ops);
    }

    /// Stop injecting failures.
    pub fn clear_failures(&self) {
        self.shared.state.lock().fail = FailOn::empty();
    }

    /// True while the subsystem is acquired.
    pub fn is_acquired(&self) -> bool {
        self.shared.state.lock().acquired
    }

    /// True while the trigger is running.
    pub fn is_triggered(&self) -> bool {
        self.shared.state.lock().triggered
    }

    /// Output resets so far.
    pub fn resets(&self) -> u32 {
        self.shared.state.lock().resets
    }

    /// AO32 resets so far.
    pub fn ao32_resets(&self) -> u32 {
        self.shared.state.lock().ao32_resets
    }

    /// Current register values.
    pub fn registers(&self) -> Vec<u16> {
        self.shared.state.lock().registers.clone()
    }

    /// Every `(channel, value)` write so far, in order.
    pub fn writes(&self) -> Vec<(u16, u16)> {
        self.shared.state.lock().writes.clone()
    }

    /// Number of writes so far.
    pub fn write_count(&self) -> usize {
        self.shared.state.lock().writes.len()
    }

    /// Block until at least `n` writes have happened or `timeout` passes.
    /// Returns true if the count was reached.
    pub fn wait_for_writes(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut st = self.shared.state.lock();
        while st.writes.len() < n {
            if self.shared.written.wait_until(&mut st, deadline).timed_out() {
                return st.writes.len() >= n;
            }
        }
        true
    }
}
