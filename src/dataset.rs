//! # Dataset Module
//!
//! Converted time series produced by one refresh cycle. A dataset is built
//! wholesale from the tail rows and never mutated afterwards; consumers hold
//! it behind an `Arc` and drop it when the next one arrives.
//!
//! ## Column Indices
//! - 0: timestamp (real time)
//! - 1: seconds since the first row of the dataset
//! - 2..=M: sensor channels after calibration, NaN where a calibration failed

use chrono::NaiveDateTime;

use crate::calibration::{CalibrationFunction, CalibrationRegistry};
use crate::channels::{ChannelConfig, FIRST_CHANNEL};
use crate::error::{BuildError, CalibrationError};
use crate::tail::RawRow;

/// Column used as the horizontal axis when extracting a series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XAxis {
    /// Wall-clock time, as seconds since the Unix epoch
    RealTime,
    /// Seconds since the first row
    Elapsed,
    /// Another channel, e.g. temperature versus temperature
    Channel(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatasetRow {
    pub timestamp: NaiveDateTime,
    pub elapsed_seconds: f64,
    /// Converted channels; `values[0]` is channel 2
    pub values: Vec<f64>,
}

impl DatasetRow {
    pub fn value(&self, index: usize) -> Option<f64> {
        match index {
            1 => Some(self.elapsed_seconds),
            i => i
                .checked_sub(FIRST_CHANNEL)
                .and_then(|k| self.values.get(k))
                .copied(),
        }
    }

    fn x(&self, axis: XAxis) -> Option<f64> {
        match axis {
            XAxis::RealTime => Some(self.timestamp.and_utc().timestamp_millis() as f64 / 1000.0),
            XAxis::Elapsed => Some(self.elapsed_seconds),
            XAxis::Channel(index) => self.value(index),
        }
    }
}

/// A cell left as NaN because its calibration could not be evaluated
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidCell {
    pub row: usize,
    pub channel: usize,
    pub error: CalibrationError,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dataset {
    rows: Vec<DatasetRow>,
    column_count: usize,
    invalid_cells: Vec<InvalidCell>,
}

impl Dataset {
    pub fn rows(&self) -> &[DatasetRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of numeric columns, including the elapsed-time column
    pub fn column_count(&self) -> usize {
        self.column_count
    }

    pub fn invalid_cells(&self) -> &[InvalidCell] {
        &self.invalid_cells
    }

    /// Newest row
    pub fn last(&self) -> Option<&DatasetRow> {
        self.rows.last()
    }

    pub fn column(&self, index: usize) -> Vec<f64> {
        self.rows.iter().filter_map(|row| row.value(index)).collect()
    }

    /// `(x, y)` pairs of channel `y` against `x`, one per row
    pub fn series(&self, x: XAxis, y: usize) -> Vec<(f64, f64)> {
        self.rows
            .iter()
            .filter_map(|row| Some((row.x(x)?, row.value(y)?)))
            .collect()
    }

    /// Range of a column for autoscaling, ignoring invalid cells
    pub fn min_max(&self, index: usize) -> Option<(f64, f64)> {
        self.rows
            .iter()
            .filter_map(|row| row.value(index))
            .filter(|v| !v.is_nan())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((min, max)) => Some((min.min(v), max.max(v))),
            })
    }
}

/// Convert tail rows using the calibrations selected in `channels`
///
/// Rows keep their order. A calibration domain error only invalidates the
/// affected cell.
///
/// # Errors
/// `BuildError::ColumnCountMismatch` when a row does not have the column
/// count the channel configuration was created for.
pub fn build(
    raw_rows: &[RawRow],
    channels: &ChannelConfig,
    registry: &CalibrationRegistry,
) -> Result<Dataset, BuildError> {
    let column_count = channels.column_count();
    if let Some(row) = raw_rows.iter().find(|row| row.column_count() != column_count) {
        return Err(BuildError::ColumnCountMismatch {
            expected: column_count,
            found: row.column_count(),
        });
    }

    let functions: Vec<CalibrationFunction> = (FIRST_CHANNEL..=column_count)
        .map(|index| registry.resolve(channels.calibration(index)))
        .collect();

    let origin = raw_rows.first().map(|row| row.timestamp);
    let mut invalid_cells = Vec::new();
    let mut rows = Vec::with_capacity(raw_rows.len());

    for (row_index, raw) in raw_rows.iter().enumerate() {
        let values = functions
            .iter()
            .zip(raw.values.iter().skip(FIRST_CHANNEL - 1))
            .enumerate()
            .map(|(k, (function, &r))| {
                function.apply(r).unwrap_or_else(|error| {
                    log::debug!("Row {} channel {}: {}", row_index, k + FIRST_CHANNEL, error);
                    invalid_cells.push(InvalidCell {
                        row: row_index,
                        channel: k + FIRST_CHANNEL,
                        error,
                    });
                    f64::NAN
                })
            })
            .collect();

        rows.push(DatasetRow {
            timestamp: raw.timestamp,
            elapsed_seconds: origin.map_or(0.0, |start| seconds_between(start, raw.timestamp)),
            values,
        });
    }

    if !invalid_cells.is_empty() {
        log::warn!(
            "{} of {} readings are outside their calibration range",
            invalid_cells.len(),
            rows.len() * functions.len()
        );
    }

    Ok(Dataset {
        rows,
        column_count,
        invalid_cells,
    })
}

fn seconds_between(start: NaiveDateTime, end: NaiveDateTime) -> f64 {
    let delta = end - start;
    delta
        .num_microseconds()
        .map_or(delta.num_seconds() as f64, |us| us as f64 / 1e6)
}
