//! [`SimRegistry`] – builds a [`PeripheralRegistry`] out of simulated drivers.
//!
//! Tests keep their own `Arc` to each simulated driver so they can script
//! input and assert on recorded output after handing the registry to the
//! code under test.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use warden_hal::sim::SimGpio;
//! use warden_hal::sim_registry::SimRegistry;
//!
//! let gpio = Arc::new(SimGpio::new());
//! let registry = SimRegistry::builder().with_gpio(Arc::clone(&gpio)).build();
//!
//! registry.gpio.write(5, true).unwrap();
//! assert_eq!(gpio.level(5), Some(true));
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use crate::registry::PeripheralRegistry;
use crate::sim::{SimCamera, SimCommandRunner, SimGpio, SimPower, SimThermometer};

/// Builder for a fully simulated [`PeripheralRegistry`].
///
/// Any driver not supplied explicitly is a fresh default simulation.
#[derive(Default)]
pub struct SimRegistry {
    gpio: Option<Arc<SimGpio>>,
    camera: Option<Arc<SimCamera>>,
    thermometer: Option<Arc<SimThermometer>>,
    commands: Option<Arc<SimCommandRunner>>,
    power: Option<Arc<SimPower>>,
    cpu_thermal_zone: Option<PathBuf>,
}

impl SimRegistry {
    /// Create a builder with no drivers supplied.
    pub fn builder() -> Self {
        Self::default()
    }

    pub fn with_gpio(mut self, gpio: Arc<SimGpio>) -> Self {
        self.gpio = Some(gpio);
        self
    }

    pub fn with_camera(mut self, camera: Arc<SimCamera>) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn with_thermometer(mut self, thermometer: Arc<SimThermometer>) -> Self {
        self.thermometer = Some(thermometer);
        self
    }

    pub fn with_commands(mut self, commands: Arc<SimCommandRunner>) -> Self {
        self.commands = Some(commands);
        self
    }

    pub fn with_power(mut self, power: Arc<SimPower>) -> Self {
        self.power = Some(power);
        self
    }

    pub fn with_cpu_thermal_zone(mut self, path: impl Into<PathBuf>) -> Self {
        self.cpu_thermal_zone = Some(path.into());
        self
    }

    /// Consume the builder and return the registry.
    pub fn build(self) -> PeripheralRegistry {
        PeripheralRegistry {
            gpio: self.gpio.unwrap_or_default(),
            camera: self
                .camera
                .unwrap_or_else(|| Arc::new(SimCamera::new("sim0"))),
            thermometer: self
                .thermometer
                .unwrap_or_else(|| Arc::new(SimThermometer::steady(21.0))),
            commands: self.commands.unwrap_or_default(),
            power: self.power.unwrap_or_default(),
            cpu_thermal_zone: self
                .cpu_thermal_zone
                .unwrap_or_else(|| PathBuf::from("/nonexistent/thermal_zone0/temp")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::WardenError;

    #[test]
    fn defaults_are_simulated() {
        let registry = SimRegistry::builder().build();
        assert_eq!(registry.camera.id(), "sim0");
        assert_eq!(registry.thermometer.read_celsius().unwrap(), 21.0);
        assert!(matches!(
            registry.camera.capture(),
            Err(WardenError::Unavailable(_))
        ));
        registry.power.reboot().unwrap();
    }

    #[test]
    fn supplied_drivers_are_shared() {
        let power = Arc::new(SimPower::new());
        let registry = SimRegistry::builder().with_power(Arc::clone(&power)).build();
        registry.power.reboot().unwrap();
        assert_eq!(power.reboots(), 1);
    }
}
