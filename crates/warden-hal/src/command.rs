//! Subprocess invocation.
//!
//! Several peripherals on the board are only reachable through command-line
//! tools (`fswebcam`, `traceroute`, `ping`, `reboot`).  Routing every call
//! through [`CommandRunner`] keeps those drivers testable with canned output.

use std::env;
use std::path::Path;
use std::process::Command;

use warden_types::WardenError;

/// Captured result of a finished subprocess.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `true` when the process exited with status 0.
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Something that can run a program to completion and capture its output.
///
/// Calls block the current thread; async callers must dispatch them onto a
/// blocking pool.
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` and wait for it to exit.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Unavailable`] when the process cannot be spawned.
    /// A non-zero exit status is *not* an error; inspect
    /// [`CommandOutput::success`].
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, WardenError>;

    /// Return `true` when `program` can be found on this host.
    fn exists(&self, program: &str) -> bool;
}

/// [`CommandRunner`] backed by [`std::process::Command`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, WardenError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| WardenError::Unavailable(format!("{program}: {e}")))?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn exists(&self, program: &str) -> bool {
        if program.contains('/') {
            return Path::new(program).exists();
        }
        env::var_os("PATH")
            .map(|paths| env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_absolute_program_does_not_exist() {
        assert!(!SystemCommandRunner.exists("/definitely/not/here/traceroute"));
    }

    #[cfg(unix)]
    #[test]
    fn runs_a_real_program() {
        let out = SystemCommandRunner.run("sh", &["-c", "echo hello"]).unwrap();
        assert!(out.success);
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn spawn_failure_is_unavailable() {
        let err = SystemCommandRunner
            .run("/definitely/not/here/fswebcam", &[])
            .unwrap_err();
        assert!(matches!(err, WardenError::Unavailable(_)));
    }
}
