//! In-process simulated drivers for tests and for running without a board.
//!
//! Every driver records what it was asked to do and lets the caller script
//! failures, so higher layers can exercise their error paths without real
//! hardware.
//!
//! # Example
//!
//! ```rust
//! use warden_hal::gpio::GpioOutput;
//! use warden_hal::sim::SimGpio;
//!
//! let gpio = SimGpio::new();
//! gpio.write(7, true).unwrap();
//! assert_eq!(gpio.level(7), Some(true));
//!
//! gpio.fail_pin(7);
//! assert!(gpio.write(7, false).is_err());
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use warden_types::{PinId, WardenError};

use crate::camera::{Camera, CameraFrame};
use crate::command::{CommandOutput, CommandRunner};
use crate::gpio::GpioOutput;
use crate::power::PowerControl;
use crate::thermometer::TemperatureSensor;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated GPIO
// ────────────────────────────────────────────────────────────────────────────

/// A simulated GPIO bank that records every write.
#[derive(Default)]
pub struct SimGpio {
    levels: Mutex<BTreeMap<PinId, bool>>,
    writes: Mutex<Vec<(PinId, bool)>>,
    failing: Mutex<BTreeSet<PinId>>,
}

impl SimGpio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `setup`/`write` on `pin` fail.
    pub fn fail_pin(&self, pin: PinId) {
        lock(&self.failing).insert(pin);
    }

    /// Undo [`fail_pin`][Self::fail_pin].
    pub fn heal_pin(&self, pin: PinId) {
        lock(&self.failing).remove(&pin);
    }

    /// Last level successfully written to `pin`.
    pub fn level(&self, pin: PinId) -> Option<bool> {
        lock(&self.levels).get(&pin).copied()
    }

    /// Every successful write, in order.
    pub fn writes(&self) -> Vec<(PinId, bool)> {
        lock(&self.writes).clone()
    }

    fn check(&self, pin: PinId) -> Result<(), WardenError> {
        if lock(&self.failing).contains(&pin) {
            Err(WardenError::hardware(format!("gpio{pin}"), "simulated write failure"))
        } else {
            Ok(())
        }
    }
}

impl GpioOutput for SimGpio {
    fn setup(&self, pin: PinId) -> Result<(), WardenError> {
        self.check(pin)
    }

    fn write(&self, pin: PinId, on: bool) -> Result<(), WardenError> {
        self.check(pin)?;
        lock(&self.levels).insert(pin, on);
        lock(&self.writes).push((pin, on));
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated camera
// ────────────────────────────────────────────────────────────────────────────

/// A simulated camera that replays a scripted queue of captures.
///
/// When the queue is empty the camera reports itself unavailable.
pub struct SimCamera {
    id: String,
    queue: Mutex<VecDeque<Result<CameraFrame, WardenError>>>,
    captures: AtomicUsize,
}

impl SimCamera {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            queue: Mutex::new(VecDeque::new()),
            captures: AtomicUsize::new(0),
        }
    }

    /// A uniform grey RGB24 frame of the given size.
    pub fn uniform_frame(width: u32, height: u32, level: u8) -> CameraFrame {
        CameraFrame {
            width,
            height,
            data: vec![level; (width * height * 3) as usize],
        }
    }

    /// Queue a successful capture.
    pub fn push_frame(&self, frame: CameraFrame) {
        lock(&self.queue).push_back(Ok(frame));
    }

    /// Queue a failed capture.
    pub fn push_failure(&self) {
        lock(&self.queue)
            .push_back(Err(WardenError::Unavailable(format!("camera {} unplugged", self.id))));
    }

    /// Number of `capture` calls so far.
    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

impl Camera for SimCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn capture(&self) -> Result<CameraFrame, WardenError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        lock(&self.queue)
            .pop_front()
            .unwrap_or_else(|| Err(WardenError::Unavailable(format!("camera {} has no frames", self.id))))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated thermometer
// ────────────────────────────────────────────────────────────────────────────

/// A simulated thermometer.  Scripted readings are consumed first; after
/// that the steady value (if any) is returned.
#[derive(Default)]
pub struct SimThermometer {
    queue: Mutex<VecDeque<Option<f64>>>,
    steady: Mutex<Option<f64>>,
}

impl SimThermometer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A thermometer that always reads `celsius`.
    pub fn steady(celsius: f64) -> Self {
        let t = Self::default();
        *lock(&t.steady) = Some(celsius);
        t
    }

    /// Queue one reading; `None` simulates a garbled read.
    pub fn push_reading(&self, reading: Option<f64>) {
        lock(&self.queue).push_back(reading);
    }
}

impl TemperatureSensor for SimThermometer {
    fn read_celsius(&self) -> Result<f64, WardenError> {
        let reading = match lock(&self.queue).pop_front() {
            Some(scripted) => scripted,
            None => *lock(&self.steady),
        };
        reading.ok_or_else(|| WardenError::Unavailable("simulated sensor has no reading".to_string()))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated command runner
// ────────────────────────────────────────────────────────────────────────────

/// A [`CommandRunner`] that returns canned output and records every call.
///
/// Output is looked up by `(program, last argument)` first, then by
/// `program` alone.  Unknown commands "run" and fail with empty output.
#[derive(Default)]
pub struct SimCommandRunner {
    by_target: HashMap<(String, String), CommandOutput>,
    by_program: HashMap<String, CommandOutput>,
    missing: BTreeSet<String>,
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl SimCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canned output for every invocation of `program`.
    pub fn with_output(mut self, program: &str, output: CommandOutput) -> Self {
        self.by_program.insert(program.to_string(), output);
        self
    }

    /// Canned output for `program` when its last argument is `target`.
    pub fn with_output_for(mut self, program: &str, target: &str, output: CommandOutput) -> Self {
        self.by_target
            .insert((program.to_string(), target.to_string()), output);
        self
    }

    /// Canned successful stdout for `program` when its last argument is `target`.
    pub fn with_stdout_for(self, program: &str, target: &str, stdout: &str) -> Self {
        self.with_output_for(
            program,
            target,
            CommandOutput {
                success: true,
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
        )
    }

    /// Report `program` as not installed.
    pub fn without_program(mut self, program: &str) -> Self {
        self.missing.insert(program.to_string());
        self
    }

    /// Every call so far as `(program, args)`.
    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        lock(&self.calls).clone()
    }

    /// Number of calls made to `program`.
    pub fn call_count(&self, program: &str) -> usize {
        lock(&self.calls).iter().filter(|(p, _)| p == program).count()
    }
}

impl CommandRunner for SimCommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, WardenError> {
        lock(&self.calls).push((
            program.to_string(),
            args.iter().map(|a| a.to_string()).collect(),
        ));
        if self.missing.contains(program) {
            return Err(WardenError::Unavailable(format!("{program}: not installed")));
        }
        let target = args.last().copied().unwrap_or_default();
        let output = self
            .by_target
            .get(&(program.to_string(), target.to_string()))
            .or_else(|| self.by_program.get(program))
            .cloned()
            .unwrap_or_default();
        Ok(output)
    }

    fn exists(&self, program: &str) -> bool {
        !self.missing.contains(program)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated power control
// ────────────────────────────────────────────────────────────────────────────

/// Counts reboot requests instead of rebooting.
#[derive(Default)]
pub struct SimPower {
    reboots: AtomicUsize,
    refuse: AtomicBool,
}

impl SimPower {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent reboot requests fail.
    pub fn refuse_reboots(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    /// Number of reboot requests received.
    pub fn reboots(&self) -> usize {
        self.reboots.load(Ordering::SeqCst)
    }
}

impl PowerControl for SimPower {
    fn reboot(&self) -> Result<(), WardenError> {
        self.reboots.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            Err(WardenError::hardware("power", "simulated reboot refusal"))
        } else {
            Ok(())
        }
    }
}
