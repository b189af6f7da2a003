//! `warden-network` – Reachability & Recovery
//!
//! Decides whether the board can still reach the internet and escalates to
//! a host reboot when it cannot.
//!
//! # Modules
//!
//! - [`cache`] – [`TargetCache`][cache::TargetCache]: the on-disk JSON cache
//!   of discovered ping targets, valid for a configurable TTL.
//! - [`prober`] – [`ReachabilityProber`][prober::ReachabilityProber]:
//!   discovers upstream routers common to several public DNS hosts with
//!   `traceroute`, then pings them.
//! - [`watchdog`] – [`NetworkWatchdog`][watchdog::NetworkWatchdog]:
//!   two-strike escalation from a failed probe to a reboot.

pub mod cache;
pub mod prober;
pub mod watchdog;

pub use cache::{CacheError, CachedTargets, TargetCache};
pub use prober::{Probe, ReachabilityProber};
pub use watchdog::{NetworkWatchdog, WatchdogVerdict};
