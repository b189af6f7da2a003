//! [`Supervisor`] – starts and stops every background loop.
//!
//! On [`start`][Supervisor::start] the supervisor drives every configured
//! pin OFF and spawns one task per loop:
//!
//! | task | period | work |
//! |---|---|---|
//! | `pin-ticker` | `tick_period` | [`PinScheduler::tick`] |
//! | `motion-watch` | `camera_check_interval` | capture, normalise, compare, record events |
//! | `temperature-logger` | `temperature_read_interval` | read sensor, append to the log |
//! | `temperature-retention` | `retention_interval` | sweep old segments |
//! | `network-watch` | `network_check_interval` | [`NetworkWatchdog::cycle`] |
//!
//! [`SupervisorHandle::shutdown`] clears the run flag, which wakes every
//! loop out of its sleep, and waits for the tasks to return.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use warden_hal::PeripheralRegistry;
use warden_kernel::{DeviceState, PinScheduler};
use warden_memory::TemperatureLog;
use warden_network::{NetworkWatchdog, Probe};
use warden_perception::{MotionDetector, SimilarityParams};

use crate::loops;

/// Timing and policy knobs of the background loops.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub tick_period: Duration,
    pub camera_check_interval: Duration,
    pub similarity: SimilarityParams,
    pub similarity_floor: u8,
    pub temperature_read_interval: Duration,
    pub retention_interval: Duration,
    pub network_check_interval: Duration,
    pub reboot_allowed: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_secs(1),
            camera_check_interval: Duration::from_secs(5),
            similarity: SimilarityParams::default(),
            similarity_floor: 70,
            temperature_read_interval: Duration::from_secs(30),
            retention_interval: Duration::from_secs(12 * 3600),
            network_check_interval: Duration::from_secs(600),
            reboot_allowed: false,
        }
    }
}

/// Everything the loops need, gathered before start.
pub struct Supervisor {
    scheduler: Arc<PinScheduler>,
    peripherals: PeripheralRegistry,
    temperature_log: Arc<TemperatureLog>,
    probe: Arc<dyn Probe>,
    config: RuntimeConfig,
}

impl Supervisor {
    pub fn new(
        scheduler: Arc<PinScheduler>,
        peripherals: PeripheralRegistry,
        temperature_log: Arc<TemperatureLog>,
        probe: Arc<dyn Probe>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            scheduler,
            peripherals,
            temperature_log,
            probe,
            config,
        }
    }

    /// Force every pin OFF and spawn the loops on the current runtime.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self) -> SupervisorHandle {
        let state = Arc::clone(self.scheduler.state());
        let failed = self.scheduler.force_all_off();
        if !failed.is_empty() {
            warn!(?failed, "some pins could not be initialised");
        }

        let cfg = self.config;
        let detector = MotionDetector::new(cfg.similarity, cfg.similarity_floor);
        let watchdog = NetworkWatchdog::new(
            self.probe,
            Arc::clone(&self.peripherals.power),
            cfg.network_check_interval,
            cfg.reboot_allowed,
        );

        let tasks = vec![
            (
                "pin-ticker",
                tokio::spawn(loops::pin_ticker(Arc::clone(&self.scheduler), cfg.tick_period)),
            ),
            (
                "motion-watch",
                tokio::spawn(loops::motion_watch(
                    Arc::clone(&state),
                    Arc::clone(&self.peripherals.camera),
                    detector,
                    cfg.camera_check_interval,
                )),
            ),
            (
                "temperature-logger",
                tokio::spawn(loops::temperature_logger(
                    Arc::clone(&state),
                    Arc::clone(&self.temperature_log),
                    Arc::clone(&self.peripherals.thermometer),
                    cfg.temperature_read_interval,
                )),
            ),
            (
                "temperature-retention",
                tokio::spawn(loops::temperature_retention(
                    Arc::clone(&state),
                    Arc::clone(&self.temperature_log),
                    cfg.retention_interval,
                )),
            ),
            (
                "network-watch",
                tokio::spawn(loops::network_watch(Arc::clone(&state), watchdog)),
            ),
        ];
        info!(tasks = tasks.len(), "background loops started");
        SupervisorHandle { state, tasks }
    }
}

/// Running loops.
pub struct SupervisorHandle {
    state: Arc<DeviceState>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl SupervisorHandle {
    pub fn state(&self) -> &Arc<DeviceState> {
        &self.state
    }

    /// Clear the run flag without waiting.
    pub fn stop(&self) {
        self.state.stop();
    }

    /// Clear the run flag and wait for every loop to return.
    pub async fn shutdown(self) {
        self.state.stop();
        for (name, task) in self.tasks {
            if let Err(e) = task.await {
                error!(task = name, error = %e, "background loop ended abnormally");
            }
        }
        info!("background loops stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loops::keys;
    use serde_json::Value;
    use warden_hal::CameraFrame;
    use warden_hal::sim::{SimCamera, SimGpio};
    use warden_hal::sim_registry::SimRegistry;

    struct FixedProbe(bool);

    impl Probe for FixedProbe {
        fn check(&self) -> bool {
            self.0
        }
    }

    fn checkerboard(size: u32) -> CameraFrame {
        let mut data = Vec::new();
        for y in 0..size {
            for x in 0..size {
                let v = if (x + y) % 2 == 0 { 255 } else { 0 };
                data.extend_from_slice(&[v, v, v]);
            }
        }
        CameraFrame {
            width: size,
            height: size,
            data,
        }
    }

    struct Rig {
        handle: SupervisorHandle,
        gpio: Arc<SimGpio>,
        _dir: tempfile::TempDir,
        log: Arc<TemperatureLog>,
    }

    fn start(camera: Arc<SimCamera>, probe: bool) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let gpio = Arc::new(SimGpio::new());
        let registry = SimRegistry::builder()
            .with_gpio(Arc::clone(&gpio))
            .with_camera(camera)
            .build();
        let state = Arc::new(DeviceState::new([1, 2]));
        let scheduler = Arc::new(PinScheduler::new(state, Arc::clone(&registry.gpio)));
        let log = Arc::new(TemperatureLog::new(dir.path(), 1024 * 1024));
        let handle = Supervisor::new(
            scheduler,
            registry,
            Arc::clone(&log),
            Arc::new(FixedProbe(probe)),
            RuntimeConfig::default(),
        )
        .start();
        Rig {
            handle,
            gpio,
            _dir: dir,
            log,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn start_forces_pins_off() {
        let rig = start(Arc::new(SimCamera::new("cam")), true);
        assert_eq!(rig.gpio.level(1), Some(false));
        assert_eq!(rig.gpio.level(2), Some(false));
        rig.handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn motion_between_captures_is_recorded() {
        let camera = Arc::new(SimCamera::new("cam"));
        camera.push_frame(SimCamera::uniform_frame(48, 48, 0));
        camera.push_frame(checkerboard(48));
        let rig = start(Arc::clone(&camera), true);

        tokio::time::sleep(Duration::from_secs(12)).await;
        let state = Arc::clone(rig.handle.state());
        let events = state.drain_motion_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].score, 0);
        assert_eq!(state.value(keys::MOTION_LAST_SCORE), Some(Value::from(0)));
        rig.handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn temperature_and_network_land_in_value_bag() {
        let rig = start(Arc::new(SimCamera::new("cam")), true);
        tokio::time::sleep(Duration::from_secs(31)).await;
        let state = Arc::clone(rig.handle.state());
        assert_eq!(state.value(keys::TEMPERATURE_LAST), Some(Value::from(21.0)));
        assert_eq!(state.value(keys::NETWORK_REACHABLE), Some(Value::Bool(true)));
        assert_eq!(rig.log.segments().unwrap().len(), 1);
        rig.handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_wakes_sleeping_loops() {
        let rig = start(Arc::new(SimCamera::new("cam")), false);
        tokio::time::sleep(Duration::from_secs(1)).await;
        let state = Arc::clone(rig.handle.state());
        tokio::time::timeout(Duration::from_secs(1), rig.handle.shutdown())
            .await
            .expect("loops exit promptly");
        assert!(!state.is_active());
    }
}
