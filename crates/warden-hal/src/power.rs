//! Host power control.

use std::sync::Arc;

use tracing::warn;
use warden_types::WardenError;

use crate::command::CommandRunner;

/// Irrecoverable host-level actions.
pub trait PowerControl: Send + Sync {
    /// Reboot the host.  On success the process is expected to be terminated
    /// by the operating system shortly afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::HardwareFault`] when the reboot command is
    /// rejected.
    fn reboot(&self) -> Result<(), WardenError>;
}

/// Reboots through the system `reboot` command.
pub struct SystemPower {
    runner: Arc<dyn CommandRunner>,
}

impl SystemPower {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

impl PowerControl for SystemPower {
    fn reboot(&self) -> Result<(), WardenError> {
        warn!("issuing host reboot");
        let out = self.runner.run("reboot", &[])?;
        if out.success {
            Ok(())
        } else {
            Err(WardenError::hardware("power", format!("reboot refused: {}", out.stderr.trim())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;
    use crate::sim::SimCommandRunner;

    #[test]
    fn reboot_runs_reboot_command() {
        let runner = Arc::new(SimCommandRunner::new().with_output(
            "reboot",
            CommandOutput {
                success: true,
                ..Default::default()
            },
        ));
        SystemPower::new(runner.clone()).reboot().unwrap();
        assert_eq!(runner.calls()[0].0, "reboot");
    }

    #[test]
    fn refused_reboot_is_an_error() {
        let runner = Arc::new(SimCommandRunner::new().with_output(
            "reboot",
            CommandOutput {
                success: false,
                stdout: String::new(),
                stderr: "must be superuser".to_string(),
            },
        ));
        let err = SystemPower::new(runner).reboot().unwrap_err();
        assert!(err.to_string().contains("must be superuser"));
    }
}
