//! # Channel Configuration Module
//!
//! Per-channel display label and calibration choice for an open log file.
//!
//! Column 1 of every row is the elapsed-time column, so configurable channels
//! are `2..=M` where M is the number of numeric columns observed when the
//! file was opened. The configuration is edited from the control surface
//! while polling runs; the dataset builder works on a cloned snapshot.

use crate::calibration::CalibrationId;
use crate::error::ChannelError;

/// Index of the first sensor channel
pub const FIRST_CHANNEL: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub index: usize,
    pub label: String,
    pub calibration: CalibrationId,
}

impl ChannelSpec {
    fn new(index: usize) -> Self {
        Self {
            index,
            label: index.to_string(),
            calibration: CalibrationId::NoConversion,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    column_count: usize,
    specs: Vec<ChannelSpec>,
}

impl ChannelConfig {
    /// Default specs for a file with `column_count` numeric columns
    pub fn new(column_count: usize) -> Self {
        Self {
            column_count,
            specs: (FIRST_CHANNEL..=column_count).map(ChannelSpec::new).collect(),
        }
    }

    pub fn column_count(&self) -> usize {
        self.column_count
    }

    pub fn specs(&self) -> &[ChannelSpec] {
        &self.specs
    }

    /// Copy taken right before a dataset build
    pub fn snapshot(&self) -> ChannelConfig {
        self.clone()
    }

    pub fn get(&self, index: usize) -> Option<&ChannelSpec> {
        index
            .checked_sub(FIRST_CHANNEL)
            .and_then(|i| self.specs.get(i))
    }

    /// Calibration of `index`; channels without a spec are not converted
    pub fn calibration(&self, index: usize) -> CalibrationId {
        self.get(index)
            .map(|spec| spec.calibration)
            .unwrap_or_default()
    }

    pub fn label(&self, index: usize) -> Option<&str> {
        self.get(index).map(|spec| spec.label.as_str())
    }

    pub fn set_calibration(&mut self, index: usize, id: CalibrationId) -> Result<(), ChannelError> {
        self.spec_mut(index)?.calibration = id;
        Ok(())
    }

    pub fn rename(&mut self, index: usize, label: impl Into<String>) -> Result<(), ChannelError> {
        self.spec_mut(index)?.label = label.into();
        Ok(())
    }

    fn spec_mut(&mut self, index: usize) -> Result<&mut ChannelSpec, ChannelError> {
        let last = self.column_count;
        index
            .checked_sub(FIRST_CHANNEL)
            .and_then(|i| self.specs.get_mut(i))
            .ok_or(ChannelError::OutOfRange {
                index,
                first: FIRST_CHANNEL,
                last,
            })
    }
}
