//! Generic `GpioOutput` trait for discrete on/off output pins (relay boards,
//! LED strips, pumps, …) and a Linux sysfs driver.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use warden_types::{PinId, WardenError};

/// A bank of discrete output pins.
///
/// The commanded ON/OFF state is tracked by the caller; drivers only push the
/// level to the hardware.
pub trait GpioOutput: Send + Sync {
    /// Prepare `pin` for output.  Called once per configured pin at startup.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::HardwareFault`] if the pin cannot be claimed.
    fn setup(&self, pin: PinId) -> Result<(), WardenError>;

    /// Drive `pin` to `on` (`true` = energised / on, `false` = off).
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::HardwareFault`] if the level cannot be applied.
    fn write(&self, pin: PinId, on: bool) -> Result<(), WardenError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Sysfs driver
// ────────────────────────────────────────────────────────────────────────────

/// GPIO driver for the legacy `/sys/class/gpio` interface.
///
/// Relay boards commonly found on single-board computers are active-low, so
/// by default ON drives the line low and OFF drives it high.
pub struct SysfsGpio {
    root: PathBuf,
    active_low: bool,
}

impl SysfsGpio {
    /// Create a driver rooted at `root` (normally `/sys/class/gpio`).
    pub fn new(root: impl Into<PathBuf>, active_low: bool) -> Self {
        Self {
            root: root.into(),
            active_low,
        }
    }

    fn pin_dir(&self, pin: PinId) -> PathBuf {
        self.root.join(format!("gpio{pin}"))
    }

    fn level(&self, on: bool) -> &'static str {
        if on != self.active_low { "1" } else { "0" }
    }

    fn write_attr(path: &Path, value: &str, pin: PinId) -> Result<(), WardenError> {
        fs::write(path, value)
            .map_err(|e| WardenError::hardware(format!("gpio{pin}"), format!("{}: {e}", path.display())))
    }
}

impl GpioOutput for SysfsGpio {
    fn setup(&self, pin: PinId) -> Result<(), WardenError> {
        let dir = self.pin_dir(pin);
        if !dir.exists() {
            Self::write_attr(&self.root.join("export"), &pin.to_string(), pin)?;
        }
        Self::write_attr(&dir.join("direction"), "out", pin)?;
        debug!(pin, "gpio exported as output");
        Ok(())
    }

    fn write(&self, pin: PinId, on: bool) -> Result<(), WardenError> {
        Self::write_attr(&self.pin_dir(pin).join("value"), self.level(on), pin)
    }
}
