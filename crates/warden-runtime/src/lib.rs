//! `warden-runtime` – Background Loop Engine
//!
//! Runs the controller: one Tokio task per background loop, all sharing a
//! single [`DeviceState`][warden_kernel::DeviceState] and stopping together
//! when its run flag is cleared.
//!
//! # Modules
//!
//! - [`supervisor`] – [`Supervisor`][supervisor::Supervisor]: initialises
//!   the pins, spawns the pin ticker, motion watch, temperature logger,
//!   temperature retention and network watch loops, and hands back a
//!   [`SupervisorHandle`][supervisor::SupervisorHandle] for shutdown.
//! - [`loops`] – the loop bodies and the value-bag
//!   [`keys`][loops::keys] they publish.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   installs the global `tracing` subscriber (compact or JSON console
//!   output) with an optional OTLP span exporter.

pub mod loops;
pub mod supervisor;
pub mod telemetry;

pub use supervisor::{RuntimeConfig, Supervisor, SupervisorHandle};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
