//! # thermo-tail
//!
//! Live view of the thermometry log written by a cryostat data logger.
//!
//! The logger appends one tab-separated row per reading: a timestamp, its own
//! elapsed-time column and one resistance per sensor. This crate reads the
//! newest rows from the end of that file, converts the resistances to
//! temperatures with the calibration chosen for each channel and republishes
//! the result on a fixed cadence.
//!
//! ## Modules
//! - [`tail`]: bounded backward reads of the log file
//! - [`calibration`]: the closed set of thermometer curves
//! - [`channels`]: per-channel label and calibration choice
//! - [`dataset`]: converted time series built from tail rows
//! - [`scheduler`]: start/stop polling with one refresh at a time
//! - [`session`]: control surface tying the above together
//! - [`config`]: persisted settings

pub mod calibration;
pub mod channels;
pub mod config;
pub mod dataset;
pub mod error;
pub mod scheduler;
pub mod session;
pub mod tail;

pub use calibration::{CalibrationFunction, CalibrationId, CalibrationRegistry};
pub use channels::{ChannelConfig, ChannelSpec};
pub use config::{ChannelPreset, Settings};
pub use dataset::{Dataset, DatasetRow, InvalidCell, XAxis};
pub use error::{
    BuildError, CalibrationError, ChannelError, ConfigError, PollError, SessionError, TailError,
};
pub use scheduler::{ChannelConsumer, DatasetConsumer, PollEvent, PollingScheduler, PollingState};
pub use session::{parse_tail_size, Session};
pub use tail::{RawRow, TailReader};
