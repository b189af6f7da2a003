//! `warden-hal` – Hardware Abstraction Layer
//!
//! Every peripheral the controller touches is reached through a small trait
//! so the device-state engine never depends on a concrete driver.
//!
//! # Modules
//!
//! - [`gpio`] – [`GpioOutput`][gpio::GpioOutput]: opaque pin I/O capability,
//!   with a Linux sysfs driver.
//! - [`camera`] – [`Camera`][camera::Camera]: single-frame capture, with an
//!   `fswebcam` driver.
//! - [`thermometer`] – [`TemperatureSensor`][thermometer::TemperatureSensor]:
//!   instantaneous readings from a 1-Wire probe, plus the SoC thermal zone.
//! - [`command`] – [`CommandRunner`][command::CommandRunner]: subprocess
//!   invocation used by the camera, the reachability prober and power control.
//! - [`power`] – [`PowerControl`][power::PowerControl]: host reboot.
//! - [`registry`] – [`PeripheralRegistry`][registry::PeripheralRegistry]: the
//!   bundle of drivers handed to the runtime.
//! - [`sim`] / [`sim_registry`] – in-process stand-ins for tests and for
//!   running on a workstation without the board attached.

pub mod camera;
pub mod command;
pub mod gpio;
pub mod power;
pub mod registry;
pub mod sim;
pub mod sim_registry;
pub mod thermometer;

pub use camera::{Camera, CameraFrame, FswebcamCamera};
pub use command::{CommandOutput, CommandRunner, SystemCommandRunner};
pub use gpio::{GpioOutput, SysfsGpio};
pub use power::{PowerControl, SystemPower};
pub use registry::{LinuxPeripherals, PeripheralRegistry};
pub use sim_registry::SimRegistry;
pub use thermometer::{TemperatureSensor, W1Thermometer, cpu_temperature};
