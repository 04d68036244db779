//! Open arguments.
//!
//! The host controller passes a packed integer vector:
//!
//! ```text
//! [naffin, priority, affinity[naffin]..., timeout_ms, port, send_prefix, as_float, host...]
//! ```
//!
//! where the host name is packed four bytes per word (little-endian) and
//! ends at the first NUL or the end of the vector. The harness reads the
//! same fields from TOML.

use std::time::Duration;

use rtc_common::rt::RtPolicy;
use serde::Deserialize;
use thiserror::Error;

/// Fixed words around the affinity mask: count, priority, timeout, port,
/// prefix flag, float flag.
const FIXED_WORDS: usize = 6;

/// Errors decoding the packed argument vector.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgsError {
    /// Fewer words than the fixed layout needs.
    #[error(
        "expected at least {needed} args (naffin, priority, affinity[naffin], timeout, port, sendPrefix, asFloat, host), got {found}"
    )]
    TooFew {
        /// Words needed.
        needed: usize,
        /// Words given.
        found: usize,
    },

    /// Negative affinity word count.
    #[error("negative affinity word count {0}")]
    BadAffinityCount(i32),

    /// Timeout below zero.
    #[error("negative timeout {0}")]
    BadTimeout(i32),

    /// Port outside 0..=65535.
    #[error("port {0} out of range")]
    BadPort(i32),

    /// Host bytes are not UTF-8.
    #[error("host name is not valid UTF-8")]
    BadHost,
}

/// Decoded open arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MirrorArgs {
    /// Dispatch thread affinity mask words.
    #[serde(default)]
    pub affinity: Vec<u32>,
    /// Dispatch thread `SCHED_RR` priority; zero or less keeps the default.
    #[serde(default)]
    pub priority: i32,
    /// Socket connect timeout in milliseconds; zero blocks.
    #[serde(default)]
    pub timeout_ms: u32,
    /// Socket port.
    #[serde(default)]
    pub port: u16,
    /// Send the module prefix once after connecting.
    #[serde(default)]
    pub send_prefix: bool,
    /// Send values as floats. Not supported.
    #[serde(default)]
    pub as_float: bool,
    /// Socket host. No socket is opened without one.
    #[serde(default)]
    pub host: Option<String>,
}

impl MirrorArgs {
    /// Decode the packed argument vector.
    pub fn from_raw(args: &[i32]) -> Result<Self, ArgsError> {
        let too_few = |needed| ArgsError::TooFew {
            needed,
            found: args.len(),
        };
        let &naffin = args.first().ok_or_else(|| too_few(FIXED_WORDS + 1))?;
        let naffin = usize::try_from(naffin).map_err(|_| ArgsError::BadAffinityCount(naffin))?;
        let needed = FIXED_WORDS + naffin + 1;
        if args.len() < needed {
            return Err(too_few(needed));
        }

        let priority = args[1];
        let affinity = args[2..2 + naffin].iter().map(|&w| w as u32).collect();
        let rest = &args[2 + naffin..];
        let timeout_ms = u32::try_from(rest[0]).map_err(|_| ArgsError::BadTimeout(rest[0]))?;
        let port = u16::try_from(rest[1]).map_err(|_| ArgsError::BadPort(rest[1]))?;
        let send_prefix = rest[2] != 0;
        let as_float = rest[3] != 0;
        let host = unpack_host(&rest[4..])?;

        Ok(Self {
            affinity,
            priority,
            timeout_ms,
            port,
            send_prefix,
            as_float,
            host,
        })
    }

    /// Scheduling policy for the dispatch thread.
    pub fn rt_policy(&self) -> RtPolicy {
        RtPolicy::new(self.affinity.clone(), self.priority)
    }

    /// Connect timeout, `None` for blocking.
    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(u64::from(self.timeout_ms)))
    }
}

fn unpack_host(words: &[i32]) -> Result<Option<String>, ArgsError> {
    let mut bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    if let Some(nul) = bytes.iter().position(|&b| b == 0) {
        bytes.truncate(nul);
    }
    if bytes.is_empty() {
        return Ok(None);
    }
    String::from_utf8(bytes).map(Some).map_err(|_| ArgsError::BadHost)
}
