//! # Error Types Module
//!
//! Centralized error handling for thermo-tail.
//! One error enum per concern, each carrying enough context to be shown to
//! the operator without further lookup.
//!
//! ## Error Types
//! - `TailError`: the log file could not be opened or a data line is malformed
//! - `CalibrationError`: a raw reading lies outside a curve's domain
//! - `BuildError`: tail rows do not match the session's channel layout
//! - `PollError`: anything that aborts a single refresh cycle
//! - `ChannelError`: a channel index outside the configurable range
//! - `SessionError`: opening a session failed
//! - `ConfigError`: settings file I/O and parsing errors
//!
//! ## Usage Examples
//! ```ignore
//! // Tail reader fails the whole read on a bad line
//! pub fn read_tail(&self, path: &Path, n: usize) -> Result<Vec<RawRow>, TailError> { ... }
//!
//! // A refresh cycle surfaces either kind through PollError
//! fn refresh(&mut self) -> Result<Dataset, PollError> { ... }
//! ```
//!
//! Calibration domain errors never abort a refresh; the dataset builder turns
//! them into invalid cells.

use std::path::PathBuf;
use thiserror::Error;

use crate::calibration::CalibrationId;

/// Errors raised while reading the tail of a log file
#[derive(Debug, Error)]
pub enum TailError {
    /// File missing, unreadable or truncated while reading
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A data line does not follow the timestamp + numeric fields layout
    #[error("malformed line {line:?}: {reason}")]
    Parse { line: String, reason: String },
}

impl TailError {
    pub(crate) fn parse(line: &str, reason: impl Into<String>) -> Self {
        TailError::Parse {
            line: line.to_string(),
            reason: reason.into(),
        }
    }
}

/// A calibration curve was evaluated outside its mathematical domain
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalibrationError {
    #[error("raw value {input} is outside the domain of the {curve} curve")]
    Domain { curve: CalibrationId, input: f64 },
}

/// Errors raised by the dataset builder
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("rows carry {found} columns but the session was opened with {expected}")]
    ColumnCountMismatch { expected: usize, found: usize },
}

/// Failure of one refresh cycle. Polling continues after any of these.
#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Tail(#[from] TailError),
    #[error(transparent)]
    Build(#[from] BuildError),
}

/// Channel index outside `first..=last`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("channel {index} does not exist (configurable channels are {first}..={last})")]
    OutOfRange {
        index: usize,
        first: usize,
        last: usize,
    },
}

/// Errors that can occur while opening a session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Tail(#[from] TailError),
    /// The file exists but holds no data rows yet, so the layout is unknown
    #[error("{} contains no data rows", .0.display())]
    NoData(PathBuf),
}

/// Errors that can occur during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadFailed(#[source] std::io::Error),
    #[error("Failed to write config file: {0}")]
    WriteFailed(#[source] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_tail_io_error_names_path() {
        let err = TailError::Io {
            path: PathBuf::from("/data/fridge.dat"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
        };
        assert!(err.to_string().contains("/data/fridge.dat"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_poll_error_is_transparent() {
        let err: PollError = TailError::parse("2024-01-01\tabc", "field 2 is not numeric").into();
        assert!(err.to_string().contains("field 2 is not numeric"));
    }

    #[test]
    fn test_config_error_chain() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = ConfigError::ReadFailed(io_err);
        assert!(err.source().is_some());
    }

    #[test]
    fn test_channel_error_display() {
        let err = ChannelError::OutOfRange {
            index: 9,
            first: 2,
            last: 4,
        };
        assert_eq!(
            err.to_string(),
            "channel 9 does not exist (configurable channels are 2..=4)"
        );
    }
}
