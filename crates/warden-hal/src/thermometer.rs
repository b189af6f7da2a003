//! Temperature sensors.
//!
//! The board carries a DS18B20 probe on the 1-Wire bus.  The kernel driver
//! exposes each probe as a `w1_slave` file of the form:
//!
//! ```text
//! 73 01 ff ff 7f ff ff ff 86 : crc=86 YES
//! 73 01 ff ff 7f ff ff ff 86 t=23187
//! ```
//!
//! where `t=` carries the reading in thousandths of a degree Celsius.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;
use warden_types::WardenError;

/// Default path of the SoC thermal zone.
pub const CPU_THERMAL_ZONE: &str = "/sys/devices/virtual/thermal/thermal_zone0/temp";

/// An instantaneous temperature source.
pub trait TemperatureSensor: Send + Sync {
    /// Read the current temperature in degrees Celsius.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Unavailable`] when the sensor cannot be read or
    /// the reading is garbled.
    fn read_celsius(&self) -> Result<f64, WardenError>;
}

/// DS18B20 probe exposed through the Linux `w1_therm` driver.
pub struct W1Thermometer {
    path: PathBuf,
}

impl W1Thermometer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TemperatureSensor for W1Thermometer {
    fn read_celsius(&self) -> Result<f64, WardenError> {
        let raw = fs::read_to_string(&self.path)
            .map_err(|e| WardenError::Unavailable(format!("{}: {e}", self.path.display())))?;
        parse_w1_slave(&raw)
            .ok_or_else(|| WardenError::Unavailable(format!("{}: no reading in sensor output", self.path.display())))
    }
}

/// Extract the `t=` reading from `w1_slave` contents, in degrees Celsius.
pub fn parse_w1_slave(raw: &str) -> Option<f64> {
    raw.split_whitespace()
        .find_map(|part| part.strip_prefix("t="))
        .and_then(|milli| milli.parse::<f64>().ok())
        .map(|milli| milli / 1000.0)
}

/// Read the SoC temperature in degrees Celsius, rounded to two decimals.
///
/// Returns `0.0` when the thermal zone cannot be read.
pub fn cpu_temperature(path: impl AsRef<Path>) -> f64 {
    let path = path.as_ref();
    match fs::read_to_string(path).map(|raw| raw.trim().parse::<f64>()) {
        Ok(Ok(milli)) => (milli / 10.0).round() / 100.0,
        Ok(Err(e)) => {
            warn!(path = %path.display(), error = %e, "garbled cpu temperature");
            0.0
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cpu temperature unavailable");
            0.0
        }
    }
}
