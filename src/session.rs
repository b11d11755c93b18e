//! # Session Module
//!
//! Control surface for one open log file: channel layout, tail size,
//! calibration selection and polling.
//!
//! ## Architecture
//! - **Session**: owns the live channel configuration and the scheduler
//! - **SessionSource**: the refresh source handed to the scheduler; reads the
//!   tail, snapshots the channel configuration and builds the dataset
//!
//! Tail size and channel configuration live behind shared handles so edits
//! made while polling take effect on the next refresh without a restart.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::calibration::{CalibrationId, CalibrationRegistry};
use crate::channels::{ChannelConfig, ChannelSpec};
use crate::config::Settings;
use crate::dataset::{self, Dataset};
use crate::error::{ChannelError, PollError, SessionError};
use crate::scheduler::{DatasetConsumer, PollingScheduler, PollingState, RefreshSource};
use crate::tail::TailReader;

/// Largest accepted tail size
pub const MAX_TAIL_SIZE: usize = 100_000;

/// Rows read when a file is opened to learn its layout
const LAYOUT_PROBE_ROWS: usize = 2;

/// Parse a tail size as typed by an operator
///
/// Accepts `k` (thousand) and `M` (million) suffixes, ignores other trailing
/// characters and clamps the result to `0..=MAX_TAIL_SIZE`.
pub fn parse_tail_size(text: &str) -> Option<usize> {
    let text = text.trim();
    let (number, factor) = if let Some(number) = text.strip_suffix('k') {
        (number, 1e3)
    } else if let Some(number) = text.strip_suffix('M') {
        (number, 1e6)
    } else {
        (text.trim_end_matches(|c: char| !c.is_ascii_digit()), 1.0)
    };

    let value: f64 = number.trim().parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some((value * factor).clamp(0.0, MAX_TAIL_SIZE as f64) as usize)
}

#[derive(Debug, Clone)]
struct SessionSource {
    path: PathBuf,
    reader: TailReader,
    registry: CalibrationRegistry,
    tail_size: Arc<AtomicUsize>,
    channels: Arc<RwLock<ChannelConfig>>,
}

impl SessionSource {
    fn load(&self) -> Result<Dataset, PollError> {
        let rows = self
            .reader
            .read_tail(&self.path, self.tail_size.load(Ordering::Relaxed))?;
        // lock only long enough to copy the current configuration
        let channels = self
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot();
        Ok(dataset::build(&rows, &channels, &self.registry)?)
    }
}

impl RefreshSource for SessionSource {
    fn refresh(&mut self) -> Result<Dataset, PollError> {
        self.load()
    }
}

pub struct Session {
    source: SessionSource,
    scheduler: PollingScheduler,
}

impl Session {
    /// Open `path`, inferring the channel layout from its newest rows
    ///
    /// Channel presets from `settings` are applied; presets naming a channel
    /// the file does not have are ignored.
    pub fn open(path: impl AsRef<Path>, settings: &Settings) -> Result<Self, SessionError> {
        let path = path.as_ref().to_path_buf();
        let reader = TailReader::new(settings.comment_marker.clone());

        let column_count = reader
            .read_tail(&path, LAYOUT_PROBE_ROWS)?
            .last()
            .map(|row| row.column_count())
            .ok_or_else(|| SessionError::NoData(path.clone()))?;

        let mut channels = ChannelConfig::new(column_count);
        for preset in &settings.channels {
            let applied = channels
                .set_calibration(preset.index, preset.calibration)
                .and_then(|()| match &preset.label {
                    Some(label) => channels.rename(preset.index, label.clone()),
                    None => Ok(()),
                });
            if let Err(e) = applied {
                log::warn!("Ignoring channel preset: {}", e);
            }
        }

        log::info!(
            "Opened {} ({} sensor channels)",
            path.display(),
            channels.specs().len()
        );

        Ok(Self {
            source: SessionSource {
                path,
                reader,
                registry: CalibrationRegistry,
                tail_size: Arc::new(AtomicUsize::new(settings.tail_size.min(MAX_TAIL_SIZE))),
                channels: Arc::new(RwLock::new(channels)),
            },
            scheduler: PollingScheduler::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.source.path
    }

    /// Number of numeric columns in the file
    pub fn column_count(&self) -> usize {
        self.channels().column_count()
    }

    pub fn channel_specs(&self) -> Vec<ChannelSpec> {
        self.channels().specs().to_vec()
    }

    pub fn tail_size(&self) -> usize {
        self.source.tail_size.load(Ordering::Relaxed)
    }

    /// Set the number of rows kept, returns the clamped value in effect
    pub fn set_tail_size(&self, n: usize) -> usize {
        let n = n.min(MAX_TAIL_SIZE);
        self.source.tail_size.store(n, Ordering::Relaxed);
        log::debug!("Tail size set to {}", n);
        n
    }

    pub fn set_channel_calibration(
        &self,
        index: usize,
        id: CalibrationId,
    ) -> Result<(), ChannelError> {
        self.channels_mut().set_calibration(index, id)?;
        log::info!("Channel {} calibration set to {}", index, id);
        Ok(())
    }

    pub fn rename_channel(&self, index: usize, label: impl Into<String>) -> Result<(), ChannelError> {
        self.channels_mut().rename(index, label)
    }

    pub fn subscribe(&self, consumer: impl DatasetConsumer + 'static) {
        self.scheduler.subscribe(consumer);
    }

    pub fn start_polling(&mut self, interval: Duration) {
        self.scheduler.start(interval, self.source.clone());
    }

    pub fn stop_polling(&mut self) {
        self.scheduler.stop();
    }

    pub fn is_polling(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn polling_state(&self) -> PollingState {
        self.scheduler.state()
    }

    /// Latest dataset published by polling
    pub fn latest(&self) -> Option<Arc<Dataset>> {
        self.scheduler.latest()
    }

    /// Read and convert once, without publishing to consumers
    pub fn refresh_once(&self) -> Result<Dataset, PollError> {
        self.source.load()
    }

    fn channels(&self) -> std::sync::RwLockReadGuard<'_, ChannelConfig> {
        self.source
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn channels_mut(&self) -> std::sync::RwLockWriteGuard<'_, ChannelConfig> {
        self.source
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
