// src/exec/process.rs

//! Production worker backend: a real `aspawn-worker` child process.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::errors::{AspawnError, Result};
use crate::exec::backend::{ProcessHandle, WorkerBackend};
use crate::protocol::{Request, WorkerMessage};
use crate::supervisor::ProcessEvent;
use crate::types::ExitInfo;

/// Launches the worker program with piped stdin/stdout. The worker's
/// stderr is inherited so its logs land next to the host's.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessBackend {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl WorkerBackend for ProcessBackend {
    fn start(
        &mut self,
        generation: u64,
        events: mpsc::UnboundedSender<ProcessEvent>,
    ) -> Result<ProcessHandle> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| AspawnError::WorkerSpawn {
            program: self.program.clone(),
            source,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AspawnError::Protocol("worker stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AspawnError::Protocol("worker stdout not captured".into()))?;
        let pid = child.id();

        debug!(generation, pid = ?pid, program = ?self.program, "worker process spawned");

        let (requests_tx, requests_rx) = mpsc::unbounded_channel::<Request>();
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        tokio::spawn(write_requests(generation, stdin, requests_rx));
        tokio::spawn(read_messages(generation, stdout, events.clone()));
        tokio::spawn(wait_for_exit(generation, child, kill_rx, events));

        Ok(ProcessHandle::new(generation, pid, requests_tx, kill_tx))
    }
}

/// Forward requests to the worker's stdin until the handle is dropped or
/// the pipe breaks. Dropping stdin tells the worker to exit.
async fn write_requests(
    generation: u64,
    mut stdin: ChildStdin,
    mut requests: mpsc::UnboundedReceiver<Request>,
) {
    while let Some(request) = requests.recv().await {
        let line = match request.to_line() {
            Ok(line) => line,
            Err(e) => {
                error!(generation, id = request.id(), error = %e, "failed to encode request");
                continue;
            }
        };

        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            debug!(generation, error = %e, "worker stdin closed; dropping requests");
            break;
        }
    }

    debug!(generation, "worker request writer finished");
}

/// Parse each stdout line at the channel boundary and pass it on.
async fn read_messages(
    generation: u64,
    stdout: ChildStdout,
    events: mpsc::UnboundedSender<ProcessEvent>,
) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                if line.trim().is_empty() {
                    continue;
                }
                let message = WorkerMessage::from_line(&line);
                if events.send(ProcessEvent::Message(message)).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(generation, error = %e, "failed to read worker stdout");
                break;
            }
        }
    }

    debug!(generation, "worker message reader finished");
}

/// Wait for the worker to exit, killing it first if asked to, and report
/// the exit exactly once.
async fn wait_for_exit(
    generation: u64,
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<ProcessEvent>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        Ok(()) = kill_rx => {
            debug!(generation, pid = ?child.id(), "killing worker process");
            if let Err(e) = child.start_kill() {
                warn!(generation, error = %e, "failed to kill worker process");
            }
            child.wait().await
        }
    };

    let status = match status {
        Ok(status) => ExitInfo::from_status(status),
        Err(e) => {
            warn!(generation, error = %e, "failed to wait for worker process");
            ExitInfo::default()
        }
    };

    debug!(generation, %status, "worker process reaped");
    let _ = events.send(ProcessEvent::Exited { generation, status });
}
