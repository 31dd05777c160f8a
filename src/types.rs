use std::fmt;
use std::process::ExitStatus;
use std::str::FromStr;

use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};

/// Identifier assigned to each submitted command.
///
/// Unique for the lifetime of a worker handle; restarts never reset it.
pub type RequestId = u64;

/// What to do when the worker process exits without being destroyed.
///
/// - `Always`: start a replacement immediately (default).
/// - `Never`: leave the supervisor in the `Failed` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartPolicy {
    Always,
    Never,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        RestartPolicy::Always
    }
}

impl FromStr for RestartPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "always" => Ok(RestartPolicy::Always),
            "never" => Ok(RestartPolicy::Never),
            other => Err(format!(
                "invalid restart policy: {other} (expected \"always\" or \"never\")"
            )),
        }
    }
}

/// Lifecycle state of a supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// A worker process launch has been requested.
    Starting,
    /// A worker process handle is live; submissions are accepted.
    Running,
    /// The worker exited unexpectedly and a replacement is being launched.
    Restarting,
    /// `destroy()` was called; waiting for the worker to exit.
    Terminating,
    /// Terminal: the worker exited after `destroy()`.
    Destroyed,
    /// Terminal: the worker exited and could not (or may not) be restarted.
    Failed,
}

impl WorkerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerState::Destroyed | WorkerState::Failed)
    }

    pub fn accepts_commands(self) -> bool {
        self == WorkerState::Running
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerState::Starting => "starting",
            WorkerState::Running => "running",
            WorkerState::Restarting => "restarting",
            WorkerState::Terminating => "terminating",
            WorkerState::Destroyed => "destroyed",
            WorkerState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// How a process terminated: an exit code, a signal name, or neither.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<String>,
}

impl ExitInfo {
    pub fn exited(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn signaled(signal: impl Into<String>) -> Self {
        Self {
            code: None,
            signal: Some(signal.into()),
        }
    }

    #[cfg(unix)]
    pub fn from_status(status: ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        Self {
            code: status.code(),
            signal: status.signal().map(signal_name),
        }
    }

    #[cfg(not(unix))]
    pub fn from_status(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: None,
        }
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.code, &self.signal) {
            (Some(code), _) => write!(f, "code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => f.write_str("unknown status"),
        }
    }
}

/// Conventional name (`SIGTERM`, ...) for a raw signal number.
pub fn signal_name(signo: i32) -> String {
    match Signal::try_from(signo) {
        Ok(signal) => signal.as_str().to_string(),
        Err(_) => format!("SIG{signo}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_policy_from_str() {
        assert_eq!("Always".parse::<RestartPolicy>(), Ok(RestartPolicy::Always));
        assert_eq!(" never ".parse::<RestartPolicy>(), Ok(RestartPolicy::Never));
        assert!("sometimes".parse::<RestartPolicy>().is_err());
    }

    #[test]
    fn test_signal_names() {
        assert_eq!(signal_name(9), "SIGKILL");
        assert_eq!(signal_name(15), "SIGTERM");
        assert_eq!(signal_name(12345), "SIG12345");
    }

    #[test]
    fn test_exit_info_display_prefers_code() {
        assert_eq!(ExitInfo::exited(3).to_string(), "code 3");
        assert_eq!(ExitInfo::signaled("SIGKILL").to_string(), "signal SIGKILL");
        assert_eq!(ExitInfo::default().to_string(), "unknown status");
    }

    #[test]
    fn test_terminal_states() {
        assert!(WorkerState::Destroyed.is_terminal());
        assert!(WorkerState::Failed.is_terminal());
        assert!(!WorkerState::Restarting.is_terminal());
        assert!(WorkerState::Running.accepts_commands());
        assert!(!WorkerState::Terminating.accepts_commands());
    }
}
