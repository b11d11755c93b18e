//! # Tail Reader Module
//!
//! Reads the newest rows of a tab-separated data-logger file without scanning
//! the whole file. The logger appends forever, so the file can be far larger
//! than what is ever shown.
//!
//! ## Line Format
//! ```text
//! 2024-03-18 14:02:11\t3600.0\t1893.2\t224.71\t91.05
//! ```
//! Field 1 is a local wall-clock timestamp, fields 2..=M+1 are raw numeric
//! readings. Lines whose first field contains the comment marker are skipped.
//!
//! ## Strategy
//! The file length is captured once, then fixed-size chunks are read
//! backwards from that offset until enough data lines have been collected.
//! Working memory stays proportional to the number of requested lines, and
//! bytes the logger appends during the read are simply not part of it.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::TailError;

pub const DEFAULT_COMMENT_MARKER: &str = "#";
const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

const TIMESTAMP_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%d-%m-%Y %H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// One data line of the log file
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub timestamp: NaiveDateTime,
    /// Raw readings; `values[0]` is column 1
    pub values: Vec<f64>,
}

impl RawRow {
    /// Number of numeric columns (M)
    pub fn column_count(&self) -> usize {
        self.values.len()
    }

    /// Raw reading of column `index` (1-based, as in the file)
    pub fn value(&self, index: usize) -> Option<f64> {
        index
            .checked_sub(1)
            .and_then(|i| self.values.get(i))
            .copied()
    }
}

#[derive(Debug, Clone)]
pub struct TailReader {
    comment_marker: String,
    chunk_size: usize,
}

impl Default for TailReader {
    fn default() -> Self {
        Self {
            comment_marker: DEFAULT_COMMENT_MARKER.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl TailReader {
    pub fn new(comment_marker: impl Into<String>) -> Self {
        Self {
            comment_marker: comment_marker.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Read at most the last `n` data rows of `path`, oldest first
    ///
    /// # Errors
    /// `TailError::Io` if the file cannot be opened or read,
    /// `TailError::Parse` if any retained line is malformed or the rows
    /// disagree on their column count.
    pub fn read_tail(&self, path: &Path, n: usize) -> Result<Vec<RawRow>, TailError> {
        let io_error = |source| TailError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut file = File::open(path).map_err(io_error)?;
        if n == 0 {
            return Ok(Vec::new());
        }
        let len = file.metadata().map_err(io_error)?.len();

        let lines = self.last_lines(&mut file, len, n).map_err(io_error)?;

        let rows = lines
            .iter()
            .map(|line| parse_line(line))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(first) = rows.first() {
            let expected = first.column_count();
            if let Some((line, row)) = lines
                .iter()
                .zip(&rows)
                .find(|(_, row)| row.column_count() != expected)
            {
                return Err(TailError::parse(
                    line,
                    format!(
                        "{} data columns, expected {} like the rows before it",
                        row.column_count(),
                        expected
                    ),
                ));
            }
        }

        log::debug!("Read {} of {} requested rows from {}", rows.len(), n, path.display());
        Ok(rows)
    }

    /// Collect the last `n` data lines in `[0, len)`, oldest first
    fn last_lines<R: Read + Seek>(
        &self,
        file: &mut R,
        len: u64,
        n: usize,
    ) -> std::io::Result<Vec<String>> {
        // grows with the lines found, `n` may be far larger than the file
        let mut newest_first: Vec<String> = Vec::new();
        // Bytes of a line whose start has not been reached yet
        let mut pending: Vec<u8> = Vec::new();
        let mut pos = len;

        while pos > 0 && newest_first.len() < n {
            let step = (self.chunk_size as u64).min(pos);
            pos -= step;

            let mut chunk = vec![0u8; step as usize];
            file.seek(SeekFrom::Start(pos))?;
            file.read_exact(&mut chunk)?;
            chunk.extend_from_slice(&pending);

            // Everything after the first newline is made of whole lines
            match chunk.iter().position(|&b| b == b'\n') {
                Some(first_newline) => {
                    for segment in chunk[first_newline + 1..].rsplit(|&b| b == b'\n') {
                        if self.keep(segment, &mut newest_first) && newest_first.len() == n {
                            return Ok(reversed(newest_first));
                        }
                    }
                    chunk.truncate(first_newline);
                    pending = chunk;
                }
                None => pending = chunk,
            }
        }

        // Start of file reached, the remainder is the first line
        self.keep(&pending, &mut newest_first);

        Ok(reversed(newest_first))
    }

    /// Push `segment` if it is a data line, returns whether it was kept
    fn keep(&self, segment: &[u8], lines: &mut Vec<String>) -> bool {
        let text = String::from_utf8_lossy(segment);
        let text = text.trim_end_matches('\r');
        if text.trim().is_empty() {
            return false;
        }
        let first_field = text.split('\t').next().unwrap_or_default();
        if !self.comment_marker.is_empty() && first_field.contains(self.comment_marker.as_str()) {
            return false;
        }
        lines.push(text.to_string());
        true
    }
}

fn reversed(mut lines: Vec<String>) -> Vec<String> {
    lines.reverse();
    lines
}

/// Read the newest `n` rows with the default comment marker
pub fn read_tail(path: impl AsRef<Path>, n: usize) -> Result<Vec<RawRow>, TailError> {
    TailReader::default().read_tail(path.as_ref(), n)
}

fn parse_line(line: &str) -> Result<RawRow, TailError> {
    let mut fields = line.split('\t');
    let stamp = fields.next().unwrap_or_default();
    let values = fields
        .enumerate()
        .map(|(i, field)| {
            field.trim().parse::<f64>().map_err(|_| {
                TailError::parse(line, format!("field {} ({:?}) is not numeric", i + 2, field))
            })
        })
        .collect::<Result<Vec<f64>, _>>()?;

    if values.is_empty() {
        return Err(TailError::parse(line, "expected a timestamp and at least one value"));
    }

    let timestamp = parse_timestamp(stamp)
        .ok_or_else(|| TailError::parse(line, format!("unrecognised timestamp {:?}", stamp)))?;

    Ok(RawRow { timestamp, values })
}

/// Parse a logger timestamp as local wall-clock time
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .or_else(|| {
            DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|stamp| stamp.naive_local())
        })
}
