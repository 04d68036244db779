//! Deformable-mirror actuator dispatch engine.
//!
//! Turns each frame's demand vector into 16-bit actuator values
//! (source → scale → offset → power → round → clamp) and hands them to a
//! dedicated dispatch thread. The thread writes the leading share to DAC
//! channels, optionally along a settling trajectory, and streams the rest
//! to a TCP peer as `0x5555`-tagged frames.
//!
//! # Modules
//!
//! - [`args`] - Packed open-argument decoding
//! - [`config`] - Actuator routing and transform configuration
//! - [`transform`] - Demand to actuator value conversion
//! - [`frame`] - Socket frame header and payload encoding
//! - [`socket`] - TCP output
//! - [`dac`] - DAC driver trait, session state machine, simulated board
//! - [`worker`] - Dispatch thread and its statistics
//! - [`engine`] - Engine facade: open, reconfigure, send, close
//! - [`error`] - Engine error type

#![warn(missing_docs)]

pub mod args;
pub mod config;
pub mod dac;
pub mod engine;
pub mod error;
pub mod frame;
pub mod socket;
pub mod transform;
pub mod worker;

pub use args::{ArgsError, MirrorArgs};
pub use config::{ActStages, ActuatorMapConfig, InitSequence, Oscillation, Trajectory};
pub use dac::{AdapterInfo, AdapterModel, DacDriver, DacError, DacProbe, DacSession, FailOn, SimulatedDac};
pub use engine::{MirrorContext, MirrorEngine};
pub use error::MirrorError;
pub use frame::{FRAME_TAG, FrameHeader, HEADER_LEN};
pub use socket::{SinkError, TcpSink};
pub use worker::DispatchStats;
