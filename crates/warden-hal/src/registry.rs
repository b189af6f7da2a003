//! [`PeripheralRegistry`] – the bundle of drivers the controller runs against.
//!
//! The runtime, the HTTP API and the reachability prober all receive their
//! hardware through one registry so that a simulated registry (see
//! [`SimRegistry`][crate::sim_registry::SimRegistry]) can replace the whole
//! board in tests.

use std::path::PathBuf;
use std::sync::Arc;

use crate::camera::{Camera, FswebcamCamera};
use crate::command::{CommandRunner, SystemCommandRunner};
use crate::gpio::{GpioOutput, SysfsGpio};
use crate::power::{PowerControl, SystemPower};
use crate::thermometer::{CPU_THERMAL_ZONE, TemperatureSensor, W1Thermometer};

/// Settings for the Linux driver set.
#[derive(Debug, Clone)]
pub struct LinuxPeripherals {
    pub gpio_root: PathBuf,
    pub gpio_active_low: bool,
    pub webcam_device: String,
    pub webcam_resolution: String,
    pub temperature_device: PathBuf,
}

/// Shared handles to every peripheral driver.
#[derive(Clone)]
pub struct PeripheralRegistry {
    pub gpio: Arc<dyn GpioOutput>,
    pub camera: Arc<dyn Camera>,
    pub thermometer: Arc<dyn TemperatureSensor>,
    pub commands: Arc<dyn CommandRunner>,
    pub power: Arc<dyn PowerControl>,
    /// Path of the SoC thermal zone read by
    /// [`cpu_temperature`][crate::thermometer::cpu_temperature].
    pub cpu_thermal_zone: PathBuf,
}

impl PeripheralRegistry {
    /// Build the registry for a real board.
    pub fn linux(settings: &LinuxPeripherals) -> Self {
        let commands: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner);
        Self {
            gpio: Arc::new(SysfsGpio::new(&settings.gpio_root, settings.gpio_active_low)),
            camera: Arc::new(FswebcamCamera::new(
                Arc::clone(&commands),
                &settings.webcam_device,
                &settings.webcam_resolution,
            )),
            thermometer: Arc::new(W1Thermometer::new(&settings.temperature_device)),
            power: Arc::new(SystemPower::new(Arc::clone(&commands))),
            commands,
            cpu_thermal_zone: PathBuf::from(CPU_THERMAL_ZONE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linux_registry_uses_configured_camera_device() {
        let registry = PeripheralRegistry::linux(&LinuxPeripherals {
            gpio_root: PathBuf::from("/sys/class/gpio"),
            gpio_active_low: true,
            webcam_device: "video2".to_string(),
            webcam_resolution: "320x240".to_string(),
            temperature_device: PathBuf::from("/tmp/w1_slave"),
        });
        assert_eq!(registry.camera.id(), "video2");
        assert_eq!(registry.cpu_thermal_zone, PathBuf::from(CPU_THERMAL_ZONE));
    }
}
