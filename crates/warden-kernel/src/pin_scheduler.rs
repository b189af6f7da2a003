//! [`PinScheduler`] – reconciles timers and schedule windows with the pins.
//!
//! # Tick
//!
//! Once per tick the scheduler builds two sets:
//!
//! - **off-set**: pins whose auto-off deadline has passed, plus scheduled
//!   pins whose current wall-clock time lies outside every one of their
//!   schedule windows;
//! - **on-set**: scheduled pins inside at least one window, unless they are
//!   already in the off-set.
//!
//! The off-set is applied first.  A pin is only driven when its commanded
//! state differs from the target, so a steady schedule produces no writes.
//! A failed hardware write abandons that pin's transition for this tick;
//! the next tick evaluates it again.
//!
//! Manual commands and schedule updates run under the same guard as the
//! tick so transitions never interleave.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use chrono::NaiveDate;
//! use warden_hal::sim::SimGpio;
//! use warden_kernel::{DeviceState, PinScheduler};
//! use warden_types::PinCommand;
//!
//! let state = Arc::new(DeviceState::new([3]));
//! let gpio = Arc::new(SimGpio::new());
//! let scheduler = PinScheduler::new(Arc::clone(&state), gpio.clone());
//!
//! let now = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(8, 0, 0).unwrap();
//! let report = scheduler.apply_command(&PinCommand { pins: vec![3], state: true, delay: 5 }, now);
//! assert_eq!(report.changed, 1);
//! assert_eq!(gpio.level(3), Some(true));
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{NaiveDateTime, TimeDelta};
use tracing::{debug, info, warn};
use warden_hal::GpioOutput;
use warden_types::{
    PinCommand, PinCommandReport, PinId, ScheduleCommand, ScheduleEntry, ScheduleReport,
    WardenError,
};

use crate::device_state::DeviceState;

/// Pins switched during one [`PinScheduler::tick`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub switched_on: Vec<PinId>,
    pub switched_off: Vec<PinId>,
    /// Pins whose hardware write failed this tick.
    pub failed: Vec<PinId>,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        self.switched_on.is_empty() && self.switched_off.is_empty() && self.failed.is_empty()
    }
}

/// Owner of every pin transition.
pub struct PinScheduler {
    state: Arc<DeviceState>,
    gpio: Arc<dyn GpioOutput>,
    guard: Mutex<()>,
}

impl PinScheduler {
    pub fn new(state: Arc<DeviceState>, gpio: Arc<dyn GpioOutput>) -> Self {
        Self {
            state,
            gpio,
            guard: Mutex::new(()),
        }
    }

    pub fn state(&self) -> &Arc<DeviceState> {
        &self.state
    }

    fn serialize(&self) -> MutexGuard<'_, ()> {
        self.guard.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set up every configured pin as an output and drive it OFF.
    ///
    /// Returns the pins that could not be initialised; they are logged and
    /// otherwise left to the regular tick.
    pub fn force_all_off(&self) -> Vec<PinId> {
        let _g = self.serialize();
        let mut failed = Vec::new();
        for pin in self.state.pins().into_keys() {
            let res = self
                .gpio
                .setup(pin)
                .and_then(|()| self.gpio.write(pin, false));
            match res {
                Ok(()) => self.record(pin, false),
                Err(e) => {
                    warn!(pin, error = %e, "pin initialisation failed");
                    failed.push(pin);
                }
            }
        }
        failed
    }

    // ────────────────────────────────────────────────────────────────────────
    // Tick
    // ────────────────────────────────────────────────────────────────────────

    /// Reconcile timers and schedule with the pin states at `now`.
    pub fn tick(&self, now: NaiveDateTime) -> TickReport {
        let _g = self.serialize();
        let (on_set, off_set) = self.plan(now);
        let mut report = TickReport::default();

        for pin in off_set {
            match self.state.pin_state(pin) {
                Some(true) => {
                    if self.drive(pin, false) {
                        self.state.clear_pin_timer(pin);
                        report.switched_off.push(pin);
                    } else {
                        report.failed.push(pin);
                    }
                }
                Some(false) => {
                    if let Some(deadline) = self.state.pin_timer(pin) {
                        if deadline <= now {
                            self.state.clear_pin_timer(pin);
                        }
                    }
                }
                None => {}
            }
        }

        for pin in on_set {
            if self.state.pin_state(pin) == Some(false) {
                if self.drive(pin, true) {
                    report.switched_on.push(pin);
                } else {
                    report.failed.push(pin);
                }
            }
        }

        if !report.is_empty() {
            debug!(?report, "tick applied");
        }
        report
    }

    fn plan(&self, now: NaiveDateTime) -> (BTreeSet<PinId>, BTreeSet<PinId>) {
        let mut off_set: BTreeSet<PinId> = self
            .state
            .pin_timers()
            .into_iter()
            .filter(|(_, deadline)| *deadline <= now)
            .map(|(pin, _)| pin)
            .collect();

        let time = now.time();
        let mut in_window: BTreeMap<PinId, bool> = BTreeMap::new();
        for entry in self.state.schedule() {
            *in_window.entry(entry.pin).or_default() |= entry.contains(time);
        }

        let mut on_set = BTreeSet::new();
        for (pin, inside) in in_window {
            if !inside {
                off_set.insert(pin);
            } else if !off_set.contains(&pin) {
                on_set.insert(pin);
            }
        }
        (on_set, off_set)
    }

    /// Write `on` to `pin` and record it.  Returns `false` when the
    /// hardware write failed.
    fn drive(&self, pin: PinId, on: bool) -> bool {
        if let Err(e) = self.gpio.write(pin, on) {
            warn!(pin, on, error = %e, "pin transition abandoned");
            return false;
        }
        self.record(pin, on);
        info!(pin, on, "pin switched");
        true
    }

    fn record(&self, pin: PinId, on: bool) {
        if let Err(e) = self.state.set_pin(pin, on, None) {
            warn!(pin, on, error = %e, "pin state not recorded");
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    // Commands
    // ────────────────────────────────────────────────────────────────────────

    /// Apply a manual pin command at `now`.
    ///
    /// Turning a pin ON arms an auto-off deadline of `now + delay`; turning
    /// it OFF clears any pending deadline.  Pins already in the requested
    /// state are left alone and do not count as changed.
    pub fn apply_command(&self, cmd: &PinCommand, now: NaiveDateTime) -> PinCommandReport {
        let _g = self.serialize();
        let mut report = PinCommandReport::default();

        for &pin in &cmd.pins {
            let Some(current) = self.state.pin_state(pin) else {
                report.errors.push(WardenError::UnknownPin(pin).to_string());
                continue;
            };
            if current == cmd.state {
                continue;
            }
            if let Err(e) = self.gpio.write(pin, cmd.state) {
                warn!(pin, error = %e, "manual pin command failed");
                report.errors.push(format!("Pin {pin} error: {e}"));
                continue;
            }
            let deadline = if cmd.state {
                auto_off_deadline(now, cmd.delay)
            } else {
                None
            };
            if let Err(e) = self.state.set_pin(pin, cmd.state, deadline) {
                warn!(pin, error = %e, "pin state not recorded");
            }
            if !cmd.state {
                self.state.clear_pin_timer(pin);
            }
            info!(pin, on = cmd.state, ?deadline, "pin switched by command");
            report.changed += 1;
        }
        report
    }

    /// Install schedule windows for the requested pins.
    pub fn update_schedule(&self, cmd: &ScheduleCommand) -> ScheduleReport {
        let _g = self.serialize();
        let mut errors = Vec::new();
        let pins: Vec<PinId> = cmd
            .pins
            .iter()
            .copied()
            .filter(|&pin| {
                let known = self.state.is_configured(pin);
                if !known {
                    errors.push(WardenError::UnknownPin(pin).to_string());
                }
                known
            })
            .collect();

        let entries = pins
            .iter()
            .flat_map(|&pin| {
                cmd.intervals
                    .iter()
                    .map(move |iv| ScheduleEntry::new(pin, iv.begin, iv.end))
            })
            .collect();
        let schedule = self.state.replace_schedule(&pins, entries, cmd.update);
        info!(?pins, merge = cmd.update, entries = schedule.len(), "schedule updated");
        ScheduleReport { schedule, errors }
    }
}

fn auto_off_deadline(now: NaiveDateTime, delay_secs: u64) -> Option<NaiveDateTime> {
    let secs = i64::try_from(delay_secs).ok()?;
    now.checked_add_signed(TimeDelta::try_seconds(secs)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use warden_hal::sim::SimGpio;
    use warden_types::TimeInterval;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 10)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn setup(pins: &[PinId]) -> (PinScheduler, Arc<DeviceState>, Arc<SimGpio>) {
        let state = Arc::new(DeviceState::new(pins.iter().copied()));
        let gpio = Arc::new(SimGpio::new());
        let scheduler = PinScheduler::new(Arc::clone(&state), gpio.clone());
        (scheduler, state, gpio)
    }

    fn schedule(pins: Vec<PinId>, windows: &[(NaiveTime, NaiveTime)], update: bool) -> ScheduleCommand {
        ScheduleCommand {
            pins,
            intervals: windows
                .iter()
                .map(|&(begin, end)| TimeInterval { begin, end })
                .collect(),
            update,
        }
    }

    #[test]
    fn scheduled_pin_follows_its_window() {
        let (sched, state, gpio) = setup(&[1, 2]);
        sched.update_schedule(&schedule(vec![1], &[(hm(9, 0), hm(10, 0))], true));

        let r = sched.tick(at(9, 30, 0));
        assert_eq!(r.switched_on, vec![1]);
        assert_eq!(state.pin_state(1), Some(true));
        assert_eq!(gpio.level(1), Some(true));

        let r = sched.tick(at(10, 1, 0));
        assert_eq!(r.switched_off, vec![1]);
        assert_eq!(state.pin_state(1), Some(false));

        // Pin 2 was never scheduled and never written.
        assert_eq!(state.pin_state(2), Some(false));
        assert!(gpio.writes().iter().all(|(pin, _)| *pin != 2));
    }

    #[test]
    fn steady_window_writes_once() {
        let (sched, _, gpio) = setup(&[1]);
        sched.update_schedule(&schedule(vec![1], &[(hm(9, 0), hm(10, 0))], true));
        sched.tick(at(9, 0, 0));
        sched.tick(at(9, 0, 1));
        sched.tick(at(9, 0, 2));
        assert_eq!(gpio.writes(), vec![(1, true)]);
    }

    #[test]
    fn pin_inside_one_of_several_windows_stays_on() {
        let (sched, state, gpio) = setup(&[1]);
        sched.update_schedule(&schedule(
            vec![1],
            &[(hm(9, 0), hm(10, 0)), (hm(18, 0), hm(19, 0))],
            true,
        ));
        for s in 0..5 {
            sched.tick(at(9, 15, s));
        }
        assert_eq!(state.pin_state(1), Some(true));
        assert_eq!(gpio.writes(), vec![(1, true)]);
    }

    #[test]
    fn manual_on_expires_after_delay() {
        let (sched, state, gpio) = setup(&[3]);
        let t0 = at(12, 0, 0);
        let report = sched.apply_command(
            &PinCommand {
                pins: vec![3],
                state: true,
                delay: 5,
            },
            t0,
        );
        assert_eq!(report.changed, 1);
        assert!(report.errors.is_empty());
        assert_eq!(state.pin_timer(3), Some(at(12, 0, 5)));

        // Not yet expired.
        assert!(sched.tick(at(12, 0, 4)).is_empty());
        assert_eq!(state.pin_state(3), Some(true));

        let r = sched.tick(at(12, 0, 6));
        assert_eq!(r.switched_off, vec![3]);
        assert_eq!(state.pin_state(3), Some(false));
        assert_eq!(state.pin_timer(3), None);
        assert_eq!(gpio.level(3), Some(false));
    }

    #[test]
    fn manual_command_reports_unknown_and_skips_unchanged() {
        let (sched, _, gpio) = setup(&[1, 2]);
        let report = sched.apply_command(
            &PinCommand {
                pins: vec![1, 9, 2],
                state: false,
                delay: 60,
            },
            at(8, 0, 0),
        );
        assert_eq!(report.changed, 0);
        assert_eq!(report.errors, vec!["Unsupported PIN: 9".to_string()]);
        assert!(gpio.writes().is_empty());
    }

    #[test]
    fn manual_off_clears_pending_timer() {
        let (sched, state, _) = setup(&[4]);
        sched.apply_command(&PinCommand { pins: vec![4], state: true, delay: 600 }, at(8, 0, 0));
        assert!(state.pin_timer(4).is_some());
        let report =
            sched.apply_command(&PinCommand { pins: vec![4], state: false, delay: 60 }, at(8, 1, 0));
        assert_eq!(report.changed, 1);
        assert_eq!(state.pin_timer(4), None);
    }

    #[test]
    fn failed_write_is_reported_and_state_kept() {
        let (sched, state, gpio) = setup(&[5]);
        gpio.fail_pin(5);
        let report =
            sched.apply_command(&PinCommand { pins: vec![5], state: true, delay: 60 }, at(8, 0, 0));
        assert_eq!(report.changed, 0);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("Pin 5 error: "));
        assert_eq!(state.pin_state(5), Some(false));
        assert_eq!(state.pin_timer(5), None);
    }

    #[test]
    fn failed_tick_write_is_retried_next_tick() {
        let (sched, state, gpio) = setup(&[1]);
        sched.update_schedule(&schedule(vec![1], &[(hm(9, 0), hm(10, 0))], true));
        gpio.fail_pin(1);
        let r = sched.tick(at(9, 0, 0));
        assert_eq!(r.failed, vec![1]);
        assert_eq!(state.pin_state(1), Some(false));

        gpio.heal_pin(1);
        let r = sched.tick(at(9, 0, 1));
        assert_eq!(r.switched_on, vec![1]);
    }

    #[test]
    fn failed_off_write_keeps_pin_and_timer() {
        let (sched, state, gpio) = setup(&[3]);
        sched.apply_command(&PinCommand { pins: vec![3], state: true, delay: 5 }, at(12, 0, 0));
        gpio.fail_pin(3);

        let r = sched.tick(at(12, 0, 6));
        assert_eq!(r.failed, vec![3]);
        assert!(r.switched_off.is_empty());
        assert_eq!(state.pin_state(3), Some(true));
        assert_eq!(state.pin_timer(3), Some(at(12, 0, 5)));
        assert_eq!(gpio.level(3), Some(true));

        gpio.heal_pin(3);
        let r = sched.tick(at(12, 0, 7));
        assert_eq!(r.switched_off, vec![3]);
        assert_eq!(state.pin_timer(3), None);
        assert_eq!(gpio.level(3), Some(false));
    }

    #[test]
    fn expired_timer_on_off_pin_is_dropped() {
        let (sched, state, gpio) = setup(&[1]);
        state.set_pin(1, false, Some(at(7, 0, 0))).unwrap();
        assert!(sched.tick(at(7, 0, 1)).is_empty());
        assert_eq!(state.pin_timer(1), None);
        assert!(gpio.writes().is_empty());
    }

    #[test]
    fn expired_timer_beats_schedule_for_one_tick() {
        let (sched, state, _) = setup(&[1]);
        sched.update_schedule(&schedule(vec![1], &[(hm(9, 0), hm(10, 0))], true));
        sched.apply_command(&PinCommand { pins: vec![1], state: true, delay: 1 }, at(9, 0, 0));

        let r = sched.tick(at(9, 0, 2));
        assert_eq!(r.switched_off, vec![1]);
        let r = sched.tick(at(9, 0, 3));
        assert_eq!(r.switched_on, vec![1]);
        assert_eq!(state.pin_state(1), Some(true));
    }

    #[test]
    fn midnight_wrapping_window_keeps_pin_off() {
        let (sched, state, _) = setup(&[1]);
        sched.update_schedule(&schedule(vec![1], &[(hm(22, 0), hm(2, 0))], true));
        sched.tick(at(23, 0, 0));
        assert_eq!(state.pin_state(1), Some(false));
    }

    #[test]
    fn schedule_update_rejects_unknown_pins_individually() {
        let (sched, _, _) = setup(&[1]);
        let report = sched.update_schedule(&schedule(vec![1, 8], &[(hm(9, 0), hm(10, 0))], true));
        assert_eq!(report.errors, vec!["Unsupported PIN: 8".to_string()]);
        assert_eq!(report.schedule, vec![ScheduleEntry::new(1, hm(9, 0), hm(10, 0))]);
    }

    #[test]
    fn schedule_replace_and_merge() {
        let (sched, _, _) = setup(&[1, 2]);
        sched.update_schedule(&schedule(vec![1, 2], &[(hm(9, 0), hm(10, 0))], true));
        let merged = sched.update_schedule(&schedule(vec![1], &[(hm(9, 0), hm(10, 0)), (hm(20, 0), hm(21, 0))], true));
        assert_eq!(merged.schedule.len(), 3);

        let replaced = sched.update_schedule(&schedule(vec![1], &[(hm(6, 0), hm(7, 0))], false));
        assert_eq!(
            replaced.schedule,
            vec![
                ScheduleEntry::new(2, hm(9, 0), hm(10, 0)),
                ScheduleEntry::new(1, hm(6, 0), hm(7, 0)),
            ]
        );
    }

    #[test]
    fn force_all_off_drives_every_pin() {
        let (sched, _, gpio) = setup(&[1, 2, 3]);
        gpio.fail_pin(2);
        assert_eq!(sched.force_all_off(), vec![2]);
        assert_eq!(gpio.level(1), Some(false));
        assert_eq!(gpio.level(3), Some(false));
        assert_eq!(gpio.level(2), None);
    }
}
