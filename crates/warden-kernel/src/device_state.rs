//! [`DeviceState`] – the single shared state of the controller.
//!
//! One instance is created at startup and shared as `Arc<DeviceState>` by
//! every background loop and the HTTP API.  Each field sits behind its own
//! lock; no method holds more than one lock at a time.  The state never
//! touches hardware: callers drive the pins and then record what they did.
//!
//! # Example
//!
//! ```rust
//! use warden_kernel::DeviceState;
//!
//! let state = DeviceState::new([3, 5]);
//! assert_eq!(state.pin_state(3), Some(false));
//!
//! state.set_pin(3, true, None).unwrap();
//! assert_eq!(state.pin_state(3), Some(true));
//! assert!(state.set_pin(9, true, None).is_err());
//! ```

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::NaiveDateTime;
use serde_json::Value;
use tokio::sync::watch;
use warden_types::{IntensityGrid, MotionEvent, PinId, ScheduleEntry, StateSnapshot, WardenError};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared device state with field-level locking.
pub struct DeviceState {
    active: watch::Sender<bool>,
    pins: Mutex<BTreeMap<PinId, bool>>,
    pin_timers: Mutex<BTreeMap<PinId, NaiveDateTime>>,
    pin_schedule: Mutex<Vec<ScheduleEntry>>,
    last_frame: Mutex<Option<IntensityGrid>>,
    motion_events: Mutex<Vec<MotionEvent>>,
    values: Mutex<BTreeMap<String, Value>>,
}

impl DeviceState {
    /// Create the state for the configured pin set.  Every pin starts OFF,
    /// timers and schedule start empty and the run flag is set.
    ///
    /// The pin key set is fixed for the lifetime of the state.
    pub fn new(pins: impl IntoIterator<Item = PinId>) -> Self {
        let (active, _) = watch::channel(true);
        Self {
            active,
            pins: Mutex::new(pins.into_iter().map(|p| (p, false)).collect()),
            pin_timers: Mutex::new(BTreeMap::new()),
            pin_schedule: Mutex::new(Vec::new()),
            last_frame: Mutex::new(None),
            motion_events: Mutex::new(Vec::new()),
            values: Mutex::new(BTreeMap::new()),
        }
    }

    // ── Run flag ─────────────────────────────────────────────────────────────

    pub fn is_active(&self) -> bool {
        *self.active.borrow()
    }

    /// Clear the run flag.  Every subscriber is woken; loops exit at their
    /// next wait point.  Idempotent.
    pub fn stop(&self) {
        self.active.send_replace(false);
    }

    /// Receiver that observes the run flag.  Loops select on
    /// `rx.wait_for(|active| !*active)` next to their sleep.
    pub fn subscribe_active(&self) -> watch::Receiver<bool> {
        self.active.subscribe()
    }

    // ── Pins ─────────────────────────────────────────────────────────────────

    /// Commanded state of `pin`, or `None` when the pin is not configured.
    pub fn pin_state(&self, pin: PinId) -> Option<bool> {
        lock(&self.pins).get(&pin).copied()
    }

    pub fn is_configured(&self, pin: PinId) -> bool {
        lock(&self.pins).contains_key(&pin)
    }

    /// Copy of every configured pin and its commanded state.
    pub fn pins(&self) -> BTreeMap<PinId, bool> {
        lock(&self.pins).clone()
    }

    /// Record the commanded state of `pin`.  When `deadline` is given it is
    /// stored as the pin's auto-off time; otherwise any existing timer is
    /// left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::UnknownPin`] for pins outside the configured
    /// set.
    pub fn set_pin(
        &self,
        pin: PinId,
        on: bool,
        deadline: Option<NaiveDateTime>,
    ) -> Result<(), WardenError> {
        {
            let mut pins = lock(&self.pins);
            let slot = pins.get_mut(&pin).ok_or(WardenError::UnknownPin(pin))?;
            *slot = on;
        }
        if let Some(deadline) = deadline {
            lock(&self.pin_timers).insert(pin, deadline);
        }
        Ok(())
    }

    // ── Timers ───────────────────────────────────────────────────────────────

    pub fn pin_timer(&self, pin: PinId) -> Option<NaiveDateTime> {
        lock(&self.pin_timers).get(&pin).copied()
    }

    /// Remove the timer of `pin`, returning the deadline it held.
    pub fn clear_pin_timer(&self, pin: PinId) -> Option<NaiveDateTime> {
        lock(&self.pin_timers).remove(&pin)
    }

    pub fn pin_timers(&self) -> BTreeMap<PinId, NaiveDateTime> {
        lock(&self.pin_timers).clone()
    }

    // ── Schedule ─────────────────────────────────────────────────────────────

    pub fn schedule(&self) -> Vec<ScheduleEntry> {
        lock(&self.pin_schedule).clone()
    }

    /// Install `entries` for `pins` and return the resulting schedule.
    ///
    /// `pins` is the allow-list: entries for pins outside it, or outside the
    /// configured pin set, are dropped.  With `merge` set the entries are
    /// added to the existing schedule (exact duplicates are dropped).
    /// Without it every existing entry for one of `pins` is removed first;
    /// entries of other pins are kept.
    pub fn replace_schedule(
        &self,
        pins: &[PinId],
        entries: Vec<ScheduleEntry>,
        merge: bool,
    ) -> Vec<ScheduleEntry> {
        let allowed: Vec<PinId> = pins
            .iter()
            .copied()
            .filter(|&pin| self.is_configured(pin))
            .collect();
        let mut schedule = lock(&self.pin_schedule);
        if !merge {
            schedule.retain(|e| !pins.contains(&e.pin));
        }
        for entry in entries.into_iter().filter(|e| allowed.contains(&e.pin)) {
            if !schedule.contains(&entry) {
                schedule.push(entry);
            }
        }
        schedule.clone()
    }

    // ── Camera ───────────────────────────────────────────────────────────────

    /// Store `frame` as the latest capture and return the one it replaces.
    pub fn swap_last_frame(&self, frame: IntensityGrid) -> Option<IntensityGrid> {
        lock(&self.last_frame).replace(frame)
    }

    pub fn push_motion_event(&self, event: MotionEvent) {
        lock(&self.motion_events).push(event);
    }

    /// Take every recorded motion event, oldest first.
    pub fn drain_motion_events(&self) -> Vec<MotionEvent> {
        std::mem::take(&mut *lock(&self.motion_events))
    }

    // ── Value bag ────────────────────────────────────────────────────────────

    pub fn value(&self, key: &str) -> Option<Value> {
        lock(&self.values).get(key).cloned()
    }

    pub fn set_value(&self, key: impl Into<String>, value: impl Into<Value>) {
        lock(&self.values).insert(key.into(), value.into());
    }

    pub fn values(&self) -> BTreeMap<String, Value> {
        lock(&self.values).clone()
    }

    /// Point-in-time copy of the pin-related fields.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            pins: self.pins(),
            pins_schedule: self.schedule(),
            pins_time: self.pin_timers(),
        }
    }
}
