// src/worker/runner.rs

//! Runs a single command inside the worker process.

use std::process::Stdio;

use tokio::process::Command as ProcessCommand;
use tracing::{debug, warn};

use crate::protocol::{Command, Response};
use crate::types::ExitInfo;

/// Run `command` to completion and build its response.
///
/// The child sees exactly `command.env`, has no stdin, and has both output
/// streams captured. A launch failure (e.g. program not found) is reported
/// in the response instead of as an error.
pub async fn run_command(command: Command) -> Response {
    let id = command.id;
    let Some((program, args)) = command.argv.split_first() else {
        return Response::launch_failed(id, "empty argv");
    };

    debug!(id, program = %program, ?args, "starting command");

    let mut cmd = ProcessCommand::new(program);
    cmd.args(args)
        .env_clear()
        .envs(&command.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match cmd.output().await {
        Ok(output) => output,
        Err(e) => {
            warn!(id, program = %program, error = %e, "failed to launch command");
            return Response::launch_failed(id, e.to_string());
        }
    };

    let status = ExitInfo::from_status(output.status);
    debug!(id, %status, "command exited");

    Response {
        id,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        code: status.code,
        signal: status.signal,
        error: None,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn command(argv: &[&str]) -> Command {
        Command {
            id: 1,
            argv: argv.iter().map(|s| s.to_string()).collect(),
            env: BTreeMap::from([("PATH".to_string(), "/usr/bin:/bin".to_string())]),
        }
    }

    #[tokio::test]
    async fn test_captures_stdout_and_code() {
        let response = run_command(command(&["sh", "-c", "echo out; echo err >&2; exit 3"])).await;
        assert_eq!(response.stdout, "out\n");
        assert_eq!(response.stderr, "err\n");
        assert_eq!(response.code, Some(3));
        assert_eq!(response.signal, None);
    }

    #[tokio::test]
    async fn test_signal_is_named() {
        let response = run_command(command(&["sh", "-c", "echo before; kill -TERM $$"])).await;
        assert_eq!(response.stdout, "before\n");
        assert_eq!(response.code, None);
        assert_eq!(response.signal.as_deref(), Some("SIGTERM"));
    }

    #[tokio::test]
    async fn test_missing_program_is_launch_failure() {
        let response = run_command(command(&["/nonexistent/aspawn-test-program"])).await;
        assert!(response.error.is_some());
        assert!(response.code.is_none());
    }
}
