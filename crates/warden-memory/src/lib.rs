//! `warden-memory` – Sensor History
//!
//! Persistent storage for sensor readings.
//!
//! # Modules
//!
//! - [`temperature`] – [`TemperatureLog`][temperature::TemperatureLog]:
//!   an append-only CSV log split into one segment per calendar month, with
//!   date-range history queries and a size-bounded retention sweep that
//!   deletes the oldest months first.

pub mod temperature;

pub use temperature::{Segment, TemperatureLog, TemperatureLogError, plan_retention};
