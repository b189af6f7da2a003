use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Identifier of a GPIO output pin, taken from the configured pin set.
pub type PinId = u32;

/// One daily-recurring window during which a pin is held ON.
///
/// The window is inclusive on both ends and evaluated against naive local
/// wall-clock time.  An entry whose `end` precedes its `begin` never matches:
/// windows are not wrapped across midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub pin: PinId,
    #[serde(deserialize_with = "wall_clock::deserialize")]
    pub begin: NaiveTime,
    #[serde(deserialize_with = "wall_clock::deserialize")]
    pub end: NaiveTime,
}

impl ScheduleEntry {
    pub fn new(pin: PinId, begin: NaiveTime, end: NaiveTime) -> Self {
        Self { pin, begin, end }
    }

    /// Return `true` when `time` falls inside `[begin, end]`.
    pub fn contains(&self, time: NaiveTime) -> bool {
        self.begin <= time && time <= self.end
    }
}

/// A `{begin, end}` pair as supplied by schedule commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    #[serde(deserialize_with = "wall_clock::deserialize")]
    pub begin: NaiveTime,
    #[serde(deserialize_with = "wall_clock::deserialize")]
    pub end: NaiveTime,
}

/// A camera change detected by the motion watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionEvent {
    /// Similarity score (0–100) that fell below the configured floor.
    pub score: u8,
    pub timestamp: NaiveDateTime,
}

/// A single temperature reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureSample {
    pub timestamp: NaiveDateTime,
    pub celsius: f64,
}

// ────────────────────────────────────────────────────────────────────────────
// Intensity grid
// ────────────────────────────────────────────────────────────────────────────

/// Row-major 2-D grid of normalised intensities in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct IntensityGrid {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl IntensityGrid {
    /// Wrap `data` as a `rows × cols` grid.  Returns `None` when the buffer
    /// length does not match the shape.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> Option<Self> {
        (rows * cols == data.len()).then_some(Self { rows, cols, data })
    }

    /// A grid with every cell set to `value`.
    pub fn filled(rows: usize, cols: usize, value: f32) -> Self {
        Self {
            rows,
            cols,
            data: vec![value; rows * cols],
        }
    }

    /// Build a grid by evaluating `f(row, col)` for every cell.
    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                data.push(f(r, c));
            }
        }
        Self { rows, cols, data }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.cols + col]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Boundary records
// ────────────────────────────────────────────────────────────────────────────

/// Read-only view of the pin-related device state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub pins: BTreeMap<PinId, bool>,
    pub pins_schedule: Vec<ScheduleEntry>,
    pub pins_time: BTreeMap<PinId, NaiveDateTime>,
}

/// Manual pin command: drive `pins` to `state`, auto-off after `delay`
/// seconds when turning on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinCommand {
    pub pins: Vec<PinId>,
    #[serde(default = "default_state")]
    pub state: bool,
    #[serde(default = "default_delay")]
    pub delay: u64,
}

fn default_state() -> bool {
    true
}

fn default_delay() -> u64 {
    60
}

/// Outcome of a [`PinCommand`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinCommandReport {
    pub changed: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Schedule command: set `intervals` for every pin in `pins`, merging with
/// the current schedule when `update` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleCommand {
    pub pins: Vec<PinId>,
    pub intervals: Vec<TimeInterval>,
    #[serde(default = "default_update")]
    pub update: bool,
}

fn default_update() -> bool {
    true
}

/// Outcome of a [`ScheduleCommand`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleReport {
    pub schedule: Vec<ScheduleEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Inclusive date range for temperature history queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRange {
    pub begin: NaiveDate,
    pub end: NaiveDate,
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Error type shared by the hardware layer and the device-state engine.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WardenError {
    #[error("Hardware Fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    #[error("Unsupported PIN: {0}")]
    UnknownPin(PinId),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Storage Error: {0}")]
    Storage(String),
}

impl WardenError {
    /// Shorthand for [`WardenError::HardwareFault`].
    pub fn hardware(component: impl Into<String>, details: impl std::fmt::Display) -> Self {
        Self::HardwareFault {
            component: component.into(),
            details: details.to_string(),
        }
    }
}

/// Lenient wall-clock time parsing: accepts `HH:MM` as well as
/// `HH:MM:SS[.fff]`.
pub mod wall_clock {
    use super::*;

    pub fn parse(raw: &str) -> Option<NaiveTime> {
        let raw = raw.trim();
        NaiveTime::parse_from_str(raw, "%H:%M:%S%.f")
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
            .ok()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid time of day: {raw}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn schedule_entry_is_inclusive() {
        let entry = ScheduleEntry::new(1, hm(9, 0), hm(10, 0));
        assert!(entry.contains(hm(9, 0)));
        assert!(entry.contains(hm(9, 30)));
        assert!(entry.contains(hm(10, 0)));
        assert!(!entry.contains(hm(10, 1)));
        assert!(!entry.contains(hm(8, 59)));
    }

    #[test]
    fn midnight_wrapping_entry_never_matches() {
        let entry = ScheduleEntry::new(1, hm(22, 0), hm(2, 0));
        assert!(!entry.contains(hm(23, 0)));
        assert!(!entry.contains(hm(1, 0)));
        assert!(!entry.contains(hm(12, 0)));
    }

    #[test]
    fn pin_command_defaults() {
        let cmd: PinCommand = serde_json::from_str(r#"{"pins":[3]}"#).unwrap();
        assert_eq!(cmd.pins, vec![3]);
        assert!(cmd.state);
        assert_eq!(cmd.delay, 60);
    }

    #[test]
    fn schedule_command_accepts_short_times() {
        let cmd: ScheduleCommand = serde_json::from_str(
            r#"{"pins":[1],"intervals":[{"begin":"09:00","end":"10:00:30"}]}"#,
        )
        .unwrap();
        assert!(cmd.update);
        assert_eq!(cmd.intervals[0].begin, hm(9, 0));
        assert_eq!(
            cmd.intervals[0].end,
            NaiveTime::from_hms_opt(10, 0, 30).unwrap()
        );
    }

    #[test]
    fn schedule_command_rejects_garbage_time() {
        let res: Result<ScheduleCommand, _> = serde_json::from_str(
            r#"{"pins":[1],"intervals":[{"begin":"nine","end":"10:00"}]}"#,
        );
        assert!(res.is_err());
    }

    #[test]
    fn pin_report_omits_empty_errors() {
        let report = PinCommandReport {
            changed: 2,
            errors: vec![],
        };
        let json = serde_json::to_string(&report).unwrap();
        assert_eq!(json, r#"{"changed":2}"#);
    }

    #[test]
    fn grid_from_vec_checks_shape() {
        assert!(IntensityGrid::from_vec(2, 3, vec![0.0; 6]).is_some());
        assert!(IntensityGrid::from_vec(2, 3, vec![0.0; 5]).is_none());
    }

    #[test]
    fn grid_from_fn_is_row_major() {
        let grid = IntensityGrid::from_fn(2, 3, |r, c| (r * 10 + c) as f32);
        assert_eq!(grid.shape(), (2, 3));
        assert_eq!(grid.get(1, 2), 12.0);
        assert_eq!(grid.as_slice()[3], 10.0);
    }

    #[test]
    fn warden_error_display() {
        let err = WardenError::hardware("gpio7", "write failed");
        assert!(err.to_string().contains("gpio7"));
        assert_eq!(WardenError::UnknownPin(9).to_string(), "Unsupported PIN: 9");
    }
}
