//! The background loops started by the [`Supervisor`][crate::Supervisor].
//!
//! Each loop owns clones of the handles it needs, guards its own body (a
//! failing cycle is logged and the loop carries on) and returns once the
//! device state's run flag is cleared.  Blocking work goes through
//! `spawn_blocking`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use warden_hal::{Camera, TemperatureSensor};
use warden_kernel::{DeviceState, PinScheduler};
use warden_memory::TemperatureLog;
use warden_network::NetworkWatchdog;
use warden_perception::{FrameError, MotionDetector, Observation, normalize};
use warden_types::WardenError;

/// Value-bag keys written by the loops.
pub mod keys {
    pub const MOTION_LAST_SCORE: &str = "motion.last_score";
    pub const TEMPERATURE_LAST: &str = "temperature.last";
    pub const NETWORK_REACHABLE: &str = "network.reachable";
    pub const NETWORK_VERDICT: &str = "network.verdict";
}

pub(crate) fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Sleep for `period` unless the run flag is cleared first.  Returns
/// `false` when the loop should exit.
pub(crate) async fn idle(active: &mut watch::Receiver<bool>, period: Duration) -> bool {
    let stopped = tokio::select! {
        _ = tokio::time::sleep(period) => false,
        _ = active.wait_for(|a| !*a) => true,
    };
    !stopped
}

// ── Pin ticker ───────────────────────────────────────────────────────────────

pub(crate) async fn pin_ticker(scheduler: Arc<PinScheduler>, period: Duration) {
    let mut active = scheduler.state().subscribe_active();
    while idle(&mut active, period).await {
        let scheduler = Arc::clone(&scheduler);
        let now = local_now();
        if let Err(e) = tokio::task::spawn_blocking(move || scheduler.tick(now)).await {
            error!(error = %e, "pin tick failed");
        }
    }
    debug!("pin ticker stopped");
}

// ── Motion watch ─────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
enum MotionCycleError {
    #[error("capture failed: {0}")]
    Capture(#[from] WardenError),
    #[error("frame unusable: {0}")]
    Frame(#[from] FrameError),
}

fn motion_cycle(
    camera: &dyn Camera,
    state: &DeviceState,
    detector: &MotionDetector,
    now: NaiveDateTime,
) -> Result<Observation, MotionCycleError> {
    let grid = normalize(&camera.capture()?)?;
    let prev = state.swap_last_frame(grid.clone());
    Ok(detector.observe(prev.as_ref(), &grid, now))
}

pub(crate) async fn motion_watch(
    state: Arc<DeviceState>,
    camera: Arc<dyn Camera>,
    detector: MotionDetector,
    period: Duration,
) {
    let mut active = state.subscribe_active();
    while state.is_active() {
        let (st, cam) = (Arc::clone(&state), Arc::clone(&camera));
        let now = local_now();
        let res =
            tokio::task::spawn_blocking(move || motion_cycle(cam.as_ref(), &st, &detector, now))
                .await;
        match res {
            Ok(Ok(Observation::Motion(event))) => {
                warn!(score = event.score, "camera change detected");
                state.push_motion_event(event);
                state.set_value(keys::MOTION_LAST_SCORE, event.score);
            }
            Ok(Ok(Observation::Still { score })) => {
                state.set_value(keys::MOTION_LAST_SCORE, score);
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(camera = camera.id(), error = %e, "motion cycle skipped"),
            Err(e) => error!(error = %e, "motion task failed"),
        }
        if !idle(&mut active, period).await {
            break;
        }
    }
    debug!("motion watch stopped");
}

// ── Temperature ──────────────────────────────────────────────────────────────

pub(crate) async fn temperature_logger(
    state: Arc<DeviceState>,
    log: Arc<TemperatureLog>,
    sensor: Arc<dyn TemperatureSensor>,
    period: Duration,
) {
    let mut active = state.subscribe_active();
    while idle(&mut active, period).await {
        let (log, sensor) = (Arc::clone(&log), Arc::clone(&sensor));
        let now = local_now();
        match tokio::task::spawn_blocking(move || log.record(sensor.as_ref(), now)).await {
            Ok(Ok(sample)) => state.set_value(keys::TEMPERATURE_LAST, sample.celsius),
            Ok(Err(e)) => error!(error = %e, "temperature not recorded"),
            Err(e) => error!(error = %e, "temperature task failed"),
        }
    }
    debug!("temperature logger stopped");
}

pub(crate) async fn temperature_retention(
    state: Arc<DeviceState>,
    log: Arc<TemperatureLog>,
    period: Duration,
) {
    let mut active = state.subscribe_active();
    while state.is_active() {
        let log = Arc::clone(&log);
        match tokio::task::spawn_blocking(move || log.sweep()).await {
            Ok(Ok(removed)) if !removed.is_empty() => {
                info!(removed = removed.len(), "temperature segments pruned")
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => error!(error = %e, "temperature storage sweep failed"),
            Err(e) => error!(error = %e, "retention task failed"),
        }
        if !idle(&mut active, period).await {
            break;
        }
    }
    debug!("temperature retention stopped");
}

// ── Network ──────────────────────────────────────────────────────────────────

pub(crate) async fn network_watch(state: Arc<DeviceState>, watchdog: NetworkWatchdog) {
    let mut active = state.subscribe_active();
    while state.is_active() {
        let verdict = tokio::select! {
            v = watchdog.cycle() => Some(v),
            _ = active.wait_for(|a| !*a) => None,
        };
        let Some(verdict) = verdict else {
            break;
        };
        state.set_value(keys::NETWORK_REACHABLE, verdict.is_reachable());
        state.set_value(keys::NETWORK_VERDICT, format!("{verdict:?}"));
        if !idle(&mut active, watchdog.interval()).await {
            break;
        }
    }
    debug!("network watch stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use warden_hal::CameraFrame;
    use warden_hal::sim::{SimCamera, SimGpio};
    use warden_types::PinCommand;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 2)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
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

    #[test]
    fn failed_capture_keeps_previous_frame() {
        let camera = SimCamera::new("cam");
        camera.push_frame(checkerboard(48));
        camera.push_failure();
        camera.push_frame(checkerboard(48));
        let state = DeviceState::new([]);
        let detector = MotionDetector::default();

        let first = motion_cycle(&camera, &state, &detector, at(7, 0, 0)).unwrap();
        assert_eq!(first, Observation::FirstFrame);

        let err = motion_cycle(&camera, &state, &detector, at(7, 0, 5)).unwrap_err();
        assert!(matches!(err, MotionCycleError::Capture(_)));

        // Compared against the frame stored before the failure.
        let third = motion_cycle(&camera, &state, &detector, at(7, 0, 10)).unwrap();
        assert_eq!(third, Observation::Still { score: 100 });
        assert_eq!(camera.captures(), 3);
    }

    #[test]
    fn changed_frame_is_reported_as_motion() {
        let camera = SimCamera::new("cam");
        camera.push_frame(SimCamera::uniform_frame(48, 48, 0));
        camera.push_frame(checkerboard(48));
        let state = DeviceState::new([]);
        let detector = MotionDetector::default();

        motion_cycle(&camera, &state, &detector, at(7, 30, 0)).unwrap();
        match motion_cycle(&camera, &state, &detector, at(7, 30, 5)).unwrap() {
            Observation::Motion(event) => {
                assert_eq!(event.score, 0);
                assert_eq!(event.timestamp, at(7, 30, 5));
            }
            other => panic!("expected motion, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn motion_watch_records_event_after_skipped_cycle() {
        let camera = Arc::new(SimCamera::new("cam"));
        camera.push_frame(SimCamera::uniform_frame(48, 48, 0));
        camera.push_failure();
        camera.push_frame(SimCamera::uniform_frame(48, 48, 0));
        camera.push_frame(checkerboard(48));
        let state = Arc::new(DeviceState::new([]));

        let task = tokio::spawn(motion_watch(
            Arc::clone(&state),
            camera.clone(),
            MotionDetector::default(),
            Duration::from_secs(5),
        ));
        tokio::time::sleep(Duration::from_secs(16)).await;
        state.stop();
        task.await.unwrap();

        assert_eq!(camera.captures(), 4);
        let events = state.drain_motion_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].score, 0);
        assert_eq!(
            state.value(keys::MOTION_LAST_SCORE),
            Some(serde_json::json!(0))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pin_ticker_expires_overdue_timer() {
        let gpio = Arc::new(SimGpio::new());
        let state = Arc::new(DeviceState::new([3]));
        let scheduler = Arc::new(PinScheduler::new(Arc::clone(&state), gpio.clone()));
        let issued = local_now() - chrono::Duration::hours(1);
        let cmd = PinCommand {
            pins: vec![3],
            state: true,
            delay: 5,
        };
        assert_eq!(scheduler.apply_command(&cmd, issued).changed, 1);

        let task = tokio::spawn(pin_ticker(Arc::clone(&scheduler), Duration::from_secs(1)));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        state.stop();
        task.await.unwrap();

        assert_eq!(state.pin_state(3), Some(false));
        assert_eq!(state.pin_timer(3), None);
        assert_eq!(gpio.level(3), Some(false));
    }
}
