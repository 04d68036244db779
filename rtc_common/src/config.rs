//! TOML configuration files.
//!
//! Parameter files and the harness configuration are plain serde types;
//! [`ConfigLoader`] reads any of them from disk, and the shared
//! `[logging]` table is [`LoggingConfig`].
//!
//! ```rust,no_run
//! use rtc_common::config::{ConfigError, ConfigLoader, LoggingConfig};
//! use serde::Deserialize;
//! use std::path::Path;
//!
//! #[derive(Debug, Deserialize)]
//! struct RigFile {
//!     #[serde(default)]
//!     logging: LoggingConfig,
//!     frames: u64,
//! }
//!
//! fn main() -> Result<(), ConfigError> {
//!     let rig = RigFile::load(Path::new("mirror.toml"))?;
//!     if rig.frames == 0 {
//!         return Err(ConfigError::invalid("frames", "must be non-zero"));
//!     }
//!     Ok(())
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure to turn a file into a usable configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// No file at this path.
    #[error("{} does not exist", .0.display())]
    NotFound(PathBuf),

    /// The file exists but could not be read.
    #[error("cannot read {}: {reason}", .path.display())]
    Read {
        /// File path.
        path: PathBuf,
        /// I/O error text.
        reason: String,
    },

    /// Malformed TOML, or a table that does not match the target type.
    #[error("malformed configuration: {0}")]
    Parse(String),

    /// Well-formed but unusable setting.
    #[error("`{field}` {reason}")]
    Invalid {
        /// Offending key.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl ConfigError {
    /// Shorthand for [`ConfigError::Invalid`].
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// `[logging] level`, lowercase in TOML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Filter directive understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Shared `[logging]` table.
///
/// ```toml
/// [logging]
/// level = "debug"
/// json = false
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Verbosity.
    #[serde(default)]
    pub level: LogLevel,

    /// JSON lines instead of the compact format.
    #[serde(default)]
    pub json: bool,
}

impl LoggingConfig {
    /// Level after a `--verbose` flag: never quieter than `debug`.
    pub fn effective_level(&self, verbose: bool) -> LogLevel {
        if verbose {
            self.level.min(LogLevel::Debug)
        } else {
            self.level
        }
    }
}

/// Read a TOML file into any deserializable type.
///
/// A missing file is [`ConfigError::NotFound`]; any other I/O failure is
/// [`ConfigError::Read`]. Semantic checks belong to the caller and are
/// reported as [`ConfigError::Invalid`].
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Read and parse `path`.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ConfigError::NotFound(path.to_path_buf())),
            Err(e) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }),
        }
    }

    /// Parse an in-memory document.
    fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}
