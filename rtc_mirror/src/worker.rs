//! Dispatch thread.
//!
//! ## Lifecycle
//! 1. Apply the RT policy and stream the init sequence, if any.
//! 2. Wait until a frame is pending or the engine closes.
//! 3. Copy the frame out under the lock, then release it; `send` never
//!    waits on device or socket I/O.
//! 4. Write the DAC share (directly, or step by step along the settling
//!    trajectory) and send the socket share.
//! 5. Record timing and the socket outcome.
//!
//! Frames submitted while a dispatch is in flight collapse into the newest
//! one.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use rtc_common::rt::{AbsoluteTimer, RtPolicy};
use rtc_common::severity::triage;
use tracing::{debug, error, info, warn};

use crate::config::{ActuatorMapConfig, Oscillation};
use crate::dac::DacSession;
use crate::frame::PayloadBuf;
use crate::socket::TcpSink;
use crate::transform::interpolate;

// ─── Dispatch Statistics ────────────────────────────────────────────

/// O(1) per-dispatch timing statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchStats {
    /// Dispatches completed.
    pub dispatch_count: u64,
    /// Last dispatch duration [ns].
    pub last_ns: i64,
    /// Shortest dispatch [ns].
    pub min_ns: i64,
    /// Longest dispatch [ns].
    pub max_ns: i64,
    /// Running sum for the average.
    pub sum_ns: i64,
    /// Dispatches whose socket send failed.
    pub send_failures: u64,
}

impl DispatchStats {
    /// Zeroed statistics.
    pub const fn new() -> Self {
        Self {
            dispatch_count: 0,
            last_ns: 0,
            min_ns: i64::MAX,
            max_ns: 0,
            sum_ns: 0,
            send_failures: 0,
        }
    }

    /// Record one dispatch.
    #[inline]
    pub fn record(&mut self, duration_ns: i64) {
        self.dispatch_count += 1;
        self.last_ns = duration_ns;
        self.min_ns = self.min_ns.min(duration_ns);
        self.max_ns = self.max_ns.max(duration_ns);
        self.sum_ns += duration_ns;
    }

    /// Average dispatch time [ns] (0 before the first dispatch).
    #[inline]
    pub fn avg_ns(&self) -> i64 {
        if self.dispatch_count == 0 {
            0
        } else {
            self.sum_ns / self.dispatch_count as i64
        }
    }
}

impl Default for DispatchStats {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Shared State ───────────────────────────────────────────────────

/// State guarded by the engine lock.
pub(crate) struct DispatchState {
    pub open: bool,
    pub config: Arc<ActuatorMapConfig>,
    /// Latest transformed frame, `config.dim` values.
    pub frame: Vec<u16>,
    pub frame_no: u32,
    pub pending: bool,
    /// A socket send failed since `send` last looked. Set by the worker,
    /// cleared by `send`.
    pub send_failed: bool,
    pub stats: DispatchStats,
}

/// Lock and wake-up shared by the engine and its dispatch thread.
pub(crate) struct Shared {
    pub state: Mutex<DispatchState>,
    pub wake: Condvar,
}

impl Shared {
    pub fn new(config: ActuatorMapConfig, frame_no: u32) -> Self {
        let frame = vec![0; config.dim];
        Self {
            state: Mutex::new(DispatchState {
                open: true,
                config: Arc::new(config),
                frame,
                frame_no,
                pending: false,
                send_failed: false,
                stats: DispatchStats::new(),
            }),
            wake: Condvar::new(),
        }
    }
}

// ─── Worker ─────────────────────────────────────────────────────────

/// What the dispatch thread hands back on exit.
pub(crate) struct WorkerExit {
    pub session: DacSession,
    pub sink: Option<TcpSink>,
}

pub(crate) struct DispatchWorker {
    shared: Arc<Shared>,
    session: DacSession,
    sink: Option<TcpSink>,
    policy: RtPolicy,
    /// DAC share of the frame being dispatched.
    cur: Vec<u16>,
    /// DAC share of the previous frame, for the trajectory.
    prev: Vec<u16>,
    payload: PayloadBuf,
    frame_no: u32,
}

impl DispatchWorker {
    pub fn new(shared: Arc<Shared>, session: DacSession, sink: Option<TcpSink>, policy: RtPolicy) -> Self {
        let socket_count = shared.state.lock().config.socket_count();
        Self {
            shared,
            session,
            sink,
            policy,
            cur: Vec::new(),
            prev: Vec::new(),
            payload: PayloadBuf::with_capacity(socket_count),
            frame_no: 0,
        }
    }

    pub fn run(mut self) -> WorkerExit {
        self.policy.apply_to_current_thread();
        let shared = Arc::clone(&self.shared);

        self.stream_init();

        loop {
            let cfg = {
                let mut st = shared.state.lock();
                while st.open && !st.pending {
                    shared.wake.wait(&mut st);
                }
                if !st.open {
                    break;
                }
                st.pending = false;
                self.load(&st)
            };

            let started = Instant::now();
            let sent = match &cfg.oscillation {
                None => self.dispatch_direct(&cfg),
                Some(osc) => self.dispatch_settling(&cfg, osc),
            };
            let elapsed = started.elapsed().as_nanos() as i64;

            let mut st = shared.state.lock();
            st.stats.record(elapsed);
            if !sent {
                st.send_failed = true;
                st.stats.send_failures += 1;
            }
        }

        let dispatches = shared.state.lock().stats.dispatch_count;
        info!(dispatches, "dispatch thread exiting");
        WorkerExit {
            session: self.session,
            sink: self.sink,
        }
    }

    fn stream_init(&mut self) {
        let (init, frame_no) = {
            let st = self.shared.state.lock();
            if !st.open {
                return;
            }
            (st.config.init.clone(), st.frame_no)
        };
        let Some(init) = init else {
            return;
        };
        debug!(
            hardware = init.hw_count,
            socket = init.socket().len(),
            "streaming init sequence"
        );

        for (ch, &v) in init.hardware().iter().enumerate() {
            self.write(ch as u16, v);
        }
        if !init.socket().is_empty() {
            self.payload.load(init.socket());
            self.frame_no = frame_no;
            if !self.send() {
                self.shared.state.lock().send_failed = true;
            }
        }
    }

    fn load(&mut self, st: &DispatchState) -> Arc<ActuatorMapConfig> {
        let cfg = Arc::clone(&st.config);
        let hw = cfg.hw_count;
        self.cur.clear();
        self.cur.extend_from_slice(&st.frame[..hw]);
        if self.prev.len() != hw {
            self.prev.clear();
            self.prev.resize(hw, 0);
        }
        self.payload.load(&st.frame[hw..cfg.dim]);
        self.frame_no = st.frame_no;
        cfg
    }

    fn dispatch_direct(&mut self, cfg: &ActuatorMapConfig) -> bool {
        for i in 0..cfg.hw_count {
            self.write(cfg.channel(i), self.cur[i]);
        }
        self.send()
    }

    /// Step the DAC share along the trajectory; the socket share goes out
    /// once, after the first step.
    fn dispatch_settling(&mut self, cfg: &ActuatorMapConfig, osc: &Oscillation) -> bool {
        let mut timer = AbsoluteTimer::start()
            .map_err(|e| warn!("trajectory runs unpaced: {e}"))
            .ok();
        let mut sent = true;

        for step in 0..osc.trajectory.steps() {
            for i in 0..cfg.hw_count {
                let coeff = osc.trajectory.coeff(step, i);
                let v = interpolate(self.prev[i], self.cur[i], coeff, cfg.min[i], cfg.max[i]);
                self.write(cfg.channel(i), v);
            }
            if step == 0 {
                sent = self.send();
            }
            let slept = timer.as_mut().map(|t| t.sleep_for(osc.step_ns));
            if let Some(Err(e)) = slept {
                warn!("trajectory pacing stopped: {e}");
                timer = None;
            }
        }

        self.prev.copy_from_slice(&self.cur);
        sent
    }

    #[inline]
    fn write(&mut self, channel: u16, value: u16) {
        if let Err(e) = triage(self.session.write(channel, value)) {
            error!(channel, "DAC write skipped: {e}");
        }
    }

    /// Send the loaded payload. Returns false if the socket failed.
    fn send(&mut self) -> bool {
        let Some(sink) = self.sink.as_mut() else {
            return true;
        };
        match sink.send_frame(self.frame_no, self.payload.as_bytes()) {
            Ok(()) => true,
            Err(e) => {
                warn!(frame = self.frame_no, "actuator socket send failed: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_track_extremes() {
        let mut s = DispatchStats::new();
        assert_eq!(s.avg_ns(), 0);
        s.record(300);
        s.record(100);
        s.record(200);
        assert_eq!((s.min_ns, s.max_ns, s.last_ns), (100, 300, 200));
        assert_eq!(s.avg_ns(), 200);
        assert_eq!(s.dispatch_count, 3);
    }
}
