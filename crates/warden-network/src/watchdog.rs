//! [`NetworkWatchdog`] – two-strike escalation from lost connectivity to a
//! host reboot.
//!
//! One [`cycle`][NetworkWatchdog::cycle] probes the network.  A failed probe
//! is confirmed by a second probe half an interval later; only a confirmed
//! outage leads to a reboot, and only when rebooting is allowed.  Probes and
//! the reboot itself run on the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use warden_hal::PowerControl;

use crate::prober::Probe;

/// Outcome of one watchdog cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogVerdict {
    /// First probe succeeded.
    Reachable,
    /// First probe failed, confirmation probe succeeded.
    Recovered,
    /// Both probes failed and rebooting is disabled.
    NeedsReboot,
    /// Both probes failed and a reboot was issued.
    Rebooted,
    /// Both probes failed and the reboot command was rejected.
    RebootFailed,
}

impl WatchdogVerdict {
    /// `true` when the network answered during the cycle.
    pub fn is_reachable(self) -> bool {
        matches!(self, Self::Reachable | Self::Recovered)
    }
}

pub struct NetworkWatchdog {
    probe: Arc<dyn Probe>,
    power: Arc<dyn PowerControl>,
    interval: Duration,
    reboot_allowed: bool,
}

impl NetworkWatchdog {
    /// `interval` is the pause between cycles; the confirmation probe runs
    /// after half of it.
    pub fn new(
        probe: Arc<dyn Probe>,
        power: Arc<dyn PowerControl>,
        interval: Duration,
        reboot_allowed: bool,
    ) -> Self {
        Self {
            probe,
            power,
            interval,
            reboot_allowed,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    async fn probe(&self) -> bool {
        let probe = Arc::clone(&self.probe);
        tokio::task::spawn_blocking(move || probe.check())
            .await
            .unwrap_or_else(|e| {
                error!(error = %e, "network probe task failed");
                false
            })
    }

    /// Run one probe / confirm / escalate cycle.
    pub async fn cycle(&self) -> WatchdogVerdict {
        if self.probe().await {
            debug!("network check passed");
            return WatchdogVerdict::Reachable;
        }

        let confirm_after = self.interval / 2;
        warn!(?confirm_after, "network unreachable, confirming");
        tokio::time::sleep(confirm_after).await;

        if self.probe().await {
            info!("network recovered");
            return WatchdogVerdict::Recovered;
        }

        if !self.reboot_allowed {
            warn!("network still unreachable; host needs reboot (reboot disabled)");
            return WatchdogVerdict::NeedsReboot;
        }

        error!("network still unreachable; rebooting host");
        let power = Arc::clone(&self.power);
        match tokio::task::spawn_blocking(move || power.reboot()).await {
            Ok(Ok(())) => WatchdogVerdict::Rebooted,
            Ok(Err(e)) => {
                error!(error = %e, "reboot failed");
                WatchdogVerdict::RebootFailed
            }
            Err(e) => {
                error!(error = %e, "reboot task failed");
                WatchdogVerdict::RebootFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use warden_hal::sim::SimPower;

    /// Replays a fixed sequence of probe answers, then answers `false`.
    struct ScriptedProbe {
        answers: Mutex<VecDeque<bool>>,
        calls: AtomicUsize,
    }

    impl ScriptedProbe {
        fn new(answers: &[bool]) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.iter().copied().collect()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Probe for ScriptedProbe {
        fn check(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answers.lock().unwrap().pop_front().unwrap_or(false)
        }
    }

    fn watchdog(probe: Arc<ScriptedProbe>, power: Arc<SimPower>, reboot: bool) -> NetworkWatchdog {
        NetworkWatchdog::new(probe, power, Duration::from_secs(600), reboot)
    }

    #[tokio::test(start_paused = true)]
    async fn reachable_on_first_probe() {
        let probe = ScriptedProbe::new(&[true]);
        let power = Arc::new(SimPower::new());
        let wd = watchdog(probe.clone(), power.clone(), true);
        assert_eq!(wd.cycle().await, WatchdogVerdict::Reachable);
        assert_eq!(probe.calls(), 1);
        assert_eq!(power.reboots(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn second_probe_waits_half_interval() {
        let probe = ScriptedProbe::new(&[false, true]);
        let power = Arc::new(SimPower::new());
        let wd = watchdog(probe.clone(), power.clone(), true);
        let started = tokio::time::Instant::now();
        assert_eq!(wd.cycle().await, WatchdogVerdict::Recovered);
        assert!(started.elapsed() >= Duration::from_secs(300));
        assert_eq!(probe.calls(), 2);
        assert_eq!(power.reboots(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn two_failures_reboot_exactly_once() {
        let probe = ScriptedProbe::new(&[false, false]);
        let power = Arc::new(SimPower::new());
        let wd = watchdog(probe.clone(), power.clone(), true);
        assert_eq!(wd.cycle().await, WatchdogVerdict::Rebooted);
        assert_eq!(power.reboots(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reboot_disabled_only_warns() {
        let probe = ScriptedProbe::new(&[]);
        let power = Arc::new(SimPower::new());
        let wd = watchdog(probe.clone(), power.clone(), false);
        assert_eq!(wd.cycle().await, WatchdogVerdict::NeedsReboot);
        assert_eq!(power.reboots(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_reboot_is_reported() {
        let probe = ScriptedProbe::new(&[]);
        let power = Arc::new(SimPower::new());
        power.refuse_reboots();
        let wd = watchdog(probe, power.clone(), true);
        assert_eq!(wd.cycle().await, WatchdogVerdict::RebootFailed);
        assert_eq!(power.reboots(), 1);
    }

    #[test]
    fn verdict_reachability() {
        assert!(WatchdogVerdict::Recovered.is_reachable());
        assert!(!WatchdogVerdict::NeedsReboot.is_reachable());
    }
}
