//! Month-segmented temperature log.
//!
//! # Storage layout
//!
//! One CSV file per calendar month inside the storage directory:
//!
//! | file                      | line format                               |
//! |---------------------------|-------------------------------------------|
//! | `month_t_<YYYY-MM>.csv`   | `<YYYY-MM-DD HH:MM:SS.ffffff>,<value:.2>` |
//!
//! Lines are only ever appended.  The retention sweep removes whole
//! segments, oldest month first, until the directory fits under the size
//! ceiling.
//!
//! # Example
//!
//! ```rust
//! use chrono::NaiveDate;
//! use warden_memory::TemperatureLog;
//! use warden_types::{HistoryRange, TemperatureSample};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let log = TemperatureLog::new(dir.path(), 150 * 1024 * 1024);
//!
//! let day = NaiveDate::from_ymd_opt(2024, 2, 10).unwrap();
//! log.append(&TemperatureSample {
//!     timestamp: day.and_hms_opt(8, 0, 0).unwrap(),
//!     celsius: 21.456,
//! })
//! .unwrap();
//!
//! let history = log.history(&HistoryRange { begin: day, end: day }).unwrap();
//! assert_eq!(history[0].celsius, 21.46);
//! ```

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{Datelike, Months, NaiveDate, NaiveDateTime};
use thiserror::Error;
use tracing::{debug, info, warn};
use warden_hal::TemperatureSensor;
use warden_types::{HistoryRange, TemperatureSample, WardenError};

const SEGMENT_PREFIX: &str = "month_t_";
const SEGMENT_SUFFIX: &str = ".csv";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
const TIMESTAMP_PARSE: &str = "%Y-%m-%d %H:%M:%S%.f";

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum TemperatureLogError {
    #[error("temperature storage I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("temperature sensor error: {0}")]
    Sensor(#[from] WardenError),
}

// ─────────────────────────────────────────────────────────────────────────────
// Segments
// ─────────────────────────────────────────────────────────────────────────────

/// One monthly file of the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// First day of the month the segment covers.
    pub month: NaiveDate,
    pub path: PathBuf,
    pub size: u64,
}

/// File name of the segment holding `date`.
pub fn segment_name(date: NaiveDate) -> String {
    format!("{SEGMENT_PREFIX}{}{SEGMENT_SUFFIX}", date.format("%Y-%m"))
}

fn parse_segment_name(name: &str) -> Option<NaiveDate> {
    let ym = name.strip_prefix(SEGMENT_PREFIX)?.strip_suffix(SEGMENT_SUFFIX)?;
    NaiveDate::parse_from_str(&format!("{ym}-01"), "%Y-%m-%d").ok()
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Number of oldest segments to delete so that the remaining total size is
/// at most `ceiling` bytes.  `segments` must be ordered oldest first.
pub fn plan_retention(segments: &[Segment], ceiling: u64) -> usize {
    let mut total: u64 = segments.iter().map(|s| s.size).sum();
    let mut remove = 0;
    for segment in segments {
        if total <= ceiling {
            break;
        }
        total -= segment.size;
        remove += 1;
    }
    remove
}

// ─────────────────────────────────────────────────────────────────────────────
// TemperatureLog
// ─────────────────────────────────────────────────────────────────────────────

/// Append-only temperature log rooted at a storage directory.
#[derive(Debug, Clone)]
pub struct TemperatureLog {
    dir: PathBuf,
    ceiling: u64,
}

impl TemperatureLog {
    /// `ceiling` is the retention limit in bytes.
    pub fn new(dir: impl Into<PathBuf>, ceiling: u64) -> Self {
        Self {
            dir: dir.into(),
            ceiling,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn segment_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(segment_name(date))
    }

    /// Append `sample` to the segment of its month, creating the storage
    /// directory and the segment as needed.
    ///
    /// # Errors
    ///
    /// Returns [`TemperatureLogError::Io`] when the segment cannot be
    /// written.
    pub fn append(&self, sample: &TemperatureSample) -> Result<(), TemperatureLogError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.segment_path(sample.timestamp.date());
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(
            file,
            "{},{:.2}",
            sample.timestamp.format(TIMESTAMP_FORMAT),
            sample.celsius
        )?;
        Ok(())
    }

    /// Read `sensor` and append the reading stamped with `now`.
    ///
    /// # Errors
    ///
    /// [`TemperatureLogError::Sensor`] when the sensor cannot be read (the
    /// log is untouched), otherwise as [`append`][Self::append].
    pub fn record(
        &self,
        sensor: &dyn TemperatureSensor,
        now: NaiveDateTime,
    ) -> Result<TemperatureSample, TemperatureLogError> {
        let sample = TemperatureSample {
            timestamp: now,
            celsius: sensor.read_celsius()?,
        };
        self.append(&sample)?;
        debug!(celsius = sample.celsius, "temperature recorded");
        Ok(sample)
    }

    /// Samples dated within `range` (inclusive), sorted by timestamp.
    /// Unparsable lines are skipped.  An inverted range yields nothing.
    ///
    /// # Errors
    ///
    /// Returns [`TemperatureLogError::Io`] when an existing segment cannot be
    /// read.
    pub fn history(&self, range: &HistoryRange) -> Result<Vec<TemperatureSample>, TemperatureLogError> {
        let mut samples = Vec::new();
        let last = first_of_month(range.end);
        let mut month = first_of_month(range.begin);
        while month <= last {
            let raw = match fs::read_to_string(self.segment_path(month)) {
                Ok(raw) => raw,
                Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
                Err(e) => return Err(e.into()),
            };
            samples.extend(
                raw.lines()
                    .filter_map(parse_line)
                    .filter(|s| (range.begin..=range.end).contains(&s.timestamp.date())),
            );
            let Some(next) = month.checked_add_months(Months::new(1)) else {
                break;
            };
            month = next;
        }
        samples.sort_by_key(|s| s.timestamp);
        Ok(samples)
    }

    /// Every segment in the storage directory, oldest month first.  A
    /// missing directory has no segments.
    ///
    /// # Errors
    ///
    /// Returns [`TemperatureLogError::Io`] when the directory cannot be
    /// listed.
    pub fn segments(&self) -> Result<Vec<Segment>, TemperatureLogError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut segments = Vec::new();
        for entry in entries {
            let entry = entry?;
            let Some(month) = entry.file_name().to_str().and_then(parse_segment_name) else {
                continue;
            };
            segments.push(Segment {
                month,
                path: entry.path(),
                size: entry.metadata()?.len(),
            });
        }
        segments.sort_by_key(|s| s.month);
        Ok(segments)
    }

    /// Delete the oldest segments until the log fits under the ceiling.
    /// Returns the removed paths.
    ///
    /// # Errors
    ///
    /// Returns [`TemperatureLogError::Io`] when listing or removing fails;
    /// segments removed before the failure stay removed.
    pub fn sweep(&self) -> Result<Vec<PathBuf>, TemperatureLogError> {
        let segments = self.segments()?;
        let total: u64 = segments.iter().map(|s| s.size).sum();
        let remove = plan_retention(&segments, self.ceiling);
        info!(segments = segments.len(), total_bytes = total, ceiling = self.ceiling, "temperature storage");

        let mut removed = Vec::with_capacity(remove);
        for segment in &segments[..remove] {
            warn!(path = %segment.path.display(), "deleting old temperature segment");
            fs::remove_file(&segment.path)?;
            removed.push(segment.path.clone());
        }
        Ok(removed)
    }
}

fn parse_line(line: &str) -> Option<TemperatureSample> {
    let (ts, value) = line.trim().split_once(',')?;
    Some(TemperatureSample {
        timestamp: NaiveDateTime::parse_from_str(ts, TIMESTAMP_PARSE).ok()?,
        celsius: value.trim().parse().ok()?,
    })
}
