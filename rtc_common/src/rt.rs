//! Real-time thread policy.
//!
//! Worker threads pin themselves to a set of cores and switch to
//! `SCHED_RR` before entering their loop. Both steps are best effort: a
//! refusal from the kernel (missing `CAP_SYS_NICE`, a core that is offline)
//! is logged as a warning and the thread keeps running with the default
//! policy.
//!
//! [`AbsoluteTimer`] paces a loop with `clock_nanosleep(TIMER_ABSTIME)` on
//! `CLOCK_MONOTONIC`, so the period does not drift with the loop body.

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::consts::NSEC_PER_SEC;

/// Errors from RT setup or pacing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RtError {
    /// `sched_setaffinity` was refused.
    #[error("sched_setaffinity failed: {0}")]
    Affinity(String),

    /// `pthread_setschedparam` was refused.
    #[error("pthread_setschedparam(SCHED_RR, {priority}) failed: {reason}")]
    Scheduler {
        /// Requested priority.
        priority: i32,
        /// OS error text.
        reason: String,
    },

    /// Clock read or sleep failed.
    #[error("clock error: {0}")]
    Clock(String),

    /// The platform has no support for the request.
    #[error("RT scheduling not supported on this platform")]
    Unsupported,
}

// ─── Policy ─────────────────────────────────────────────────────────

/// CPU affinity and priority for one worker thread.
///
/// `core_mask` is a little-endian bitmask in 32-bit words: bit `b` of word
/// `w` selects CPU `w * 32 + b`. An empty or all-zero mask leaves affinity
/// untouched; a priority of zero or less leaves the scheduler untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RtPolicy {
    /// Affinity bitmask words.
    #[serde(default)]
    pub core_mask: Vec<u32>,
    /// `SCHED_RR` priority.
    #[serde(default)]
    pub priority: i32,
}

impl RtPolicy {
    /// Policy from explicit mask words and priority.
    pub fn new(core_mask: Vec<u32>, priority: i32) -> Self {
        Self {
            core_mask,
            priority,
        }
    }

    /// CPU indices selected by the mask, ascending.
    pub fn cores(&self) -> impl Iterator<Item = usize> + '_ {
        self.core_mask
            .iter()
            .enumerate()
            .flat_map(|(word, &bits)| {
                (0..32usize)
                    .filter(move |b| bits & (1u32 << b) != 0)
                    .map(move |b| word * 32 + b)
            })
    }

    /// Apply this policy to the calling thread.
    ///
    /// Returns the steps that were refused; each is also logged.
    pub fn apply_to_current_thread(&self) -> Vec<RtError> {
        let mut refused = Vec::new();

        match set_affinity(self) {
            Ok(true) => debug!(cores = ?self.cores().collect::<Vec<_>>(), "affinity set"),
            Ok(false) => {}
            Err(e) => refused.push(e),
        }
        if self.priority > 0 {
            match set_scheduler(self.priority) {
                Ok(()) => debug!(priority = self.priority, "SCHED_RR set"),
                Err(e) => refused.push(e),
            }
        }

        for e in &refused {
            warn!("RT policy not applied: {e}");
        }
        refused
    }
}

#[cfg(target_os = "linux")]
fn online_cpus() -> usize {
    // SAFETY: sysconf has no preconditions.
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if n < 1 { 1 } else { n as usize }
}

/// Returns `Ok(false)` when the mask selects no usable core.
#[cfg(target_os = "linux")]
fn set_affinity(policy: &RtPolicy) -> Result<bool, RtError> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let limit = online_cpus().min(CpuSet::count());
    let mut cpuset = CpuSet::new();
    let mut any = false;
    for cpu in policy.cores().filter(|&c| c < limit) {
        cpuset
            .set(cpu)
            .map_err(|e| RtError::Affinity(format!("CpuSet::set({cpu}): {e}")))?;
        any = true;
    }
    if !any {
        return Ok(false);
    }
    sched_setaffinity(Pid::from_raw(0), &cpuset).map_err(|e| RtError::Affinity(e.to_string()))?;
    Ok(true)
}

#[cfg(target_os = "linux")]
fn set_scheduler(priority: i32) -> Result<(), RtError> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: `pthread_self` is always a live thread and `param` outlives the call.
    let ret = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_RR, &param) };
    if ret != 0 {
        return Err(RtError::Scheduler {
            priority,
            reason: std::io::Error::from_raw_os_error(ret).to_string(),
        });
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_affinity(policy: &RtPolicy) -> Result<bool, RtError> {
    if policy.cores().next().is_none() {
        Ok(false)
    } else {
        Err(RtError::Unsupported)
    }
}

#[cfg(not(target_os = "linux"))]
fn set_scheduler(_priority: i32) -> Result<(), RtError> {
    Err(RtError::Unsupported)
}

// ─── Absolute-Time Pacing ───────────────────────────────────────────

/// Drift-free periodic sleeper on `CLOCK_MONOTONIC`.
#[cfg(target_os = "linux")]
pub struct AbsoluteTimer {
    next: nix::sys::time::TimeSpec,
}

#[cfg(target_os = "linux")]
impl AbsoluteTimer {
    /// Timer whose first deadline is measured from now.
    pub fn start() -> Result<Self, RtError> {
        use nix::time::{ClockId, clock_gettime};
        let next = clock_gettime(ClockId::CLOCK_MONOTONIC)
            .map_err(|e| RtError::Clock(format!("clock_gettime: {e}")))?;
        Ok(Self { next })
    }

    /// Advance the deadline by `interval_ns` and sleep until it.
    ///
    /// Returns immediately if the deadline has already passed.
    pub fn sleep_for(&mut self, interval_ns: i64) -> Result<(), RtError> {
        use nix::errno::Errno;
        use nix::time::{ClockId, ClockNanosleepFlags, clock_nanosleep};

        self.next = timespec_add_ns(self.next, interval_ns);
        loop {
            match clock_nanosleep(
                ClockId::CLOCK_MONOTONIC,
                ClockNanosleepFlags::TIMER_ABSTIME,
                &self.next,
            ) {
                Ok(_) => return Ok(()),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(RtError::Clock(format!("clock_nanosleep: {e}"))),
            }
        }
    }
}

/// Drift-free periodic sleeper built on `Instant`.
#[cfg(not(target_os = "linux"))]
pub struct AbsoluteTimer {
    next: std::time::Instant,
}

#[cfg(not(target_os = "linux"))]
impl AbsoluteTimer {
    /// Timer whose first deadline is measured from now.
    pub fn start() -> Result<Self, RtError> {
        Ok(Self {
            next: std::time::Instant::now(),
        })
    }

    /// Advance the deadline by `interval_ns` and sleep until it.
    pub fn sleep_for(&mut self, interval_ns: i64) -> Result<(), RtError> {
        self.next += std::time::Duration::from_nanos(interval_ns.max(0) as u64);
        if let Some(remaining) = self.next.checked_duration_since(std::time::Instant::now()) {
            std::thread::sleep(remaining);
        }
        Ok(())
    }
}

// ─── Time Helpers ───────────────────────────────────────────────────

/// Add nanoseconds to a TimeSpec, normalizing the nanosecond field.
#[cfg(target_os = "linux")]
pub fn timespec_add_ns(ts: nix::sys::time::TimeSpec, ns: i64) -> nix::sys::time::TimeSpec {
    use nix::sys::time::TimeSpec;
    let total = ts.tv_nsec() as i64 + ns;
    let secs = ts.tv_sec() as i64 + total.div_euclid(NSEC_PER_SEC);
    let nanos = total.rem_euclid(NSEC_PER_SEC);
    TimeSpec::new(secs as _, nanos as _)
}

/// Convert seconds to whole nanoseconds, saturating at zero for negatives.
pub fn secs_to_ns(secs: f32) -> i64 {
    if secs <= 0.0 || !secs.is_finite() {
        0
    } else {
        (secs as f64 * NSEC_PER_SEC as f64) as i64
    }
}
