//! Actuator dispatch engine facade.
//!
//! ## Lifecycle
//! 1. [`MirrorEngine::open`] brings the DAC to `Running`, validates the
//!    parameters, connects the socket and starts the dispatch thread.
//!    Any failure releases what was already acquired.
//! 2. [`MirrorEngine::send`] transforms a demand vector into the shared
//!    frame and wakes the dispatch thread. It never waits for I/O.
//! 3. [`MirrorEngine::new_param`] swaps in a new configuration.
//! 4. [`MirrorEngine::close`] stops the thread, then resets and releases
//!    the DAC and closes the socket. Dropping the engine closes it too.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use rtc_common::error_sink::ErrorSink;
use rtc_common::ingest::{self, ParamError, ParamErrors, UpdateOutcome};
use rtc_common::param::ParamSource;
use rtc_common::recorder::ActuatorRecorder;
use rtc_common::severity::triage;
use tracing::{debug, error, info, warn};

use crate::args::MirrorArgs;
use crate::config::{ActuatorMapConfig, names};
use crate::dac::{DacDriver, DacSession};
use crate::error::MirrorError;
use crate::socket::TcpSink;
use crate::transform;
use crate::worker::{DispatchStats, DispatchWorker, Shared, WorkerExit};

const CONTEXT: &str = "mirror";

/// Collaborators supplied by the host controller.
pub struct MirrorContext {
    /// Where configuration and I/O problems are reported.
    pub errors: Arc<dyn ErrorSink>,
    /// Optional per-frame actuator recorder.
    pub recorder: Option<Arc<dyn ActuatorRecorder>>,
    /// Module prefix, sent to the socket peer when requested.
    pub prefix: String,
}

/// Deformable-mirror dispatch engine.
pub struct MirrorEngine {
    shared: Arc<Shared>,
    update: Mutex<()>,
    worker: Mutex<Option<JoinHandle<WorkerExit>>>,
    nacts: usize,
    hw_channels: usize,
    errors: Arc<dyn ErrorSink>,
    recorder: Option<Arc<dyn ActuatorRecorder>>,
}

impl MirrorEngine {
    /// Open the engine for a demand vector of `nacts` values.
    pub fn open(
        args: &MirrorArgs,
        driver: Box<dyn DacDriver>,
        params: &dyn ParamSource,
        ctx: MirrorContext,
        nacts: usize,
        frame_no: u32,
    ) -> Result<Self, MirrorError> {
        let MirrorContext {
            errors,
            recorder,
            prefix,
        } = ctx;
        let fail = |e: MirrorError| {
            error!(frame_no, "mirror open failed: {e}");
            errors.report(frame_no, &format!("{CONTEXT}: {e}"));
            e
        };

        if args.as_float {
            return Err(fail(MirrorError::FloatOutput));
        }

        let session = DacSession::open(driver).map_err(|e| fail(MirrorError::Dac(e)))?;
        let hw_channels = session.channels();

        let config = match ActuatorMapConfig::from_params(params, nacts, hw_channels) {
            Ok((config, warnings)) => {
                ingest::report(errors.as_ref(), frame_no, CONTEXT, &warnings);
                config
            }
            Err(errs) => {
                ingest::report(errors.as_ref(), frame_no, CONTEXT, errs.iter());
                return Err(errs.into());
            }
        };
        if let Some(rec) = &recorder {
            rec.reshape(config.dim).map_err(|e| fail(e.into()))?;
        }

        let sink = match &args.host {
            Some(host) => {
                let prefix = args.send_prefix.then_some(prefix.as_bytes());
                let sink = TcpSink::connect(host, args.port, args.connect_timeout(), prefix)
                    .map_err(|e| fail(e.into()))?;
                Some(sink)
            }
            None => None,
        };

        let dim = config.dim;
        let hw_count = config.hw_count;
        let shared = Arc::new(Shared::new(config, frame_no));
        let worker = DispatchWorker::new(Arc::clone(&shared), session, sink, args.rt_policy());
        let handle = thread::Builder::new()
            .name("mirror-dispatch".into())
            .spawn(move || worker.run())
            .map_err(|e| fail(MirrorError::Spawn(e)))?;

        info!(
            nacts,
            dim,
            hw_count,
            hw_channels,
            socket = args.host.is_some(),
            "mirror engine opened"
        );

        Ok(Self {
            shared,
            update: Mutex::new(()),
            worker: Mutex::new(Some(handle)),
            nacts,
            hw_channels,
            errors,
            recorder,
        })
    }

    /// Re-read parameters and install a new configuration.
    ///
    /// On rejection the previous configuration stays active.
    pub fn new_param(
        &self,
        params: &dyn ParamSource,
        frame_no: u32,
    ) -> Result<UpdateOutcome, ParamErrors> {
        let _serial = self.update.lock();
        let (config, warnings) = ActuatorMapConfig::from_params(params, self.nacts, self.hw_channels)
            .inspect_err(|errs| ingest::report(self.errors.as_ref(), frame_no, CONTEXT, errs.iter()))?;

        let dim = config.dim;
        let reshape = self.shared.state.lock().frame.len() != dim;
        if let Some(rec) = &self.recorder {
            if let Err(e) = rec.reshape(dim) {
                let errs = ParamErrors::from(ParamError::invalid(
                    names::ACT_MAPPING,
                    format!("recorder: {e}"),
                ));
                ingest::report(self.errors.as_ref(), frame_no, CONTEXT, errs.iter());
                return Err(errs);
            }
        }
        ingest::report(self.errors.as_ref(), frame_no, CONTEXT, &warnings);

        let stages = config.stages();
        {
            let mut st = self.shared.state.lock();
            if reshape {
                st.frame = vec![0; dim];
                st.pending = false;
            }
            st.config = Arc::new(config);
        }
        debug!(frame_no, dim, ?stages, "mirror configuration installed");
        Ok(UpdateOutcome::from_warnings(warnings))
    }

    /// Transform `demand` and queue it for dispatch.
    ///
    /// Returns the number of clamp events. `upstream_err` skips the frame.
    /// When the previous frame failed to reach the socket the new frame is
    /// still queued and [`MirrorError::PreviousSendFailed`] is returned.
    pub fn send(
        &self,
        demand: &[f32],
        frame_no: u32,
        timestamp: f64,
        upstream_err: bool,
        record: bool,
    ) -> Result<usize, MirrorError> {
        if upstream_err {
            return Err(MirrorError::Upstream(frame_no));
        }
        if demand.len() != self.nacts {
            return Err(MirrorError::DemandLength {
                expected: self.nacts,
                found: demand.len(),
            });
        }

        let mut st = self.shared.state.lock();
        if !st.open {
            return Err(MirrorError::Closed);
        }
        let previous_failed = std::mem::take(&mut st.send_failed);
        let cfg = Arc::clone(&st.config);
        let clipped = transform::apply(&cfg, demand, &mut st.frame);
        st.frame_no = frame_no;
        st.pending = true;
        if let Some(rec) = self.recorder.as_ref().filter(|_| record) {
            rec.record(&st.frame, timestamp, frame_no);
        }
        drop(st);
        self.shared.wake.notify_one();

        if previous_failed {
            Err(MirrorError::PreviousSendFailed { frame: frame_no })
        } else {
            Ok(clipped)
        }
    }

    /// The active configuration.
    pub fn config(&self) -> Arc<ActuatorMapConfig> {
        Arc::clone(&self.shared.state.lock().config)
    }

    /// Dispatch timing so far.
    pub fn stats(&self) -> DispatchStats {
        self.shared.state.lock().stats.clone()
    }

    /// Demand vector length.
    pub fn nacts(&self) -> usize {
        self.nacts
    }

    /// True until [`close`](Self::close).
    pub fn is_open(&self) -> bool {
        self.shared.state.lock().open
    }

    /// Stop the dispatch thread and release the DAC and socket.
    ///
    /// Blocks until the thread has finished its current dispatch. A DAC
    /// reset or release failure here aborts the process. Later calls are
    /// no-ops.
    pub fn close(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        self.shared.state.lock().open = false;
        self.shared.wake.notify_all();

        match handle.join() {
            Ok(WorkerExit { session, sink }) => {
                if let Some(sink) = sink {
                    debug!(peer = %sink.peer(), frames = sink.frames(), "closing actuator socket");
                }
                if let Err(e) = triage(session.close()) {
                    warn!("DAC close: {e}");
                }
            }
            Err(_) => error!("dispatch thread panicked"),
        }

        let stats = self.stats();
        info!(
            dispatches = stats.dispatch_count,
            avg_ns = stats.avg_ns(),
            max_ns = stats.max_ns,
            send_failures = stats.send_failures,
            "mirror engine closed"
        );
    }
}

impl Drop for MirrorEngine {
    fn drop(&mut self) {
        self.close();
    }
}
