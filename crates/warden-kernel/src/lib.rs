//! `warden-kernel` – Device State & Pin Timing
//!
//! The core of the controller. It holds the one shared device state and
//! applies the timing rules that decide when an output pin switches.
//!
//! # Modules
//!
//! - [`device_state`] – [`DeviceState`][device_state::DeviceState]:
//!   the shared state object (pins, timers, schedule, last camera frame,
//!   motion events, value bag and the run flag).  Every field has its own
//!   lock so loops touching different fields never contend.
//! - [`pin_scheduler`] – [`PinScheduler`][pin_scheduler::PinScheduler]:
//!   the once-per-tick reconciliation of timers and schedule windows with
//!   the commanded pin states, plus manual pin commands and schedule
//!   updates.  All pin transitions pass through it.

pub mod device_state;
pub mod pin_scheduler;

pub use device_state::DeviceState;
pub use pin_scheduler::{PinScheduler, TickReport};
