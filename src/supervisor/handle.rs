// src/supervisor/handle.rs

//! Caller-facing side of the supervisor: construction and the cloneable
//! [`WorkerHandle`].

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{Instrument, Span, debug};

use crate::errors::{AspawnError, CommandError, Output, Result};
use crate::exec::{ProcessBackend, WorkerBackend};
use crate::protocol::Command;
use crate::types::{RequestId, RestartPolicy, WorkerState};

use super::core::SupervisorCore;
use super::options::{SpawnOptions, resolve_env, validate_argv};
use super::runtime::{HandleRequest, Supervisor};
use super::{Submission, WorkerExit, WorkerStatus};

/// File name of the worker runtime binary.
pub const WORKER_BIN: &str = "aspawn-worker";

/// Configuration for [`create_worker`].
#[derive(Debug, Clone, Default)]
pub struct WorkerConfig {
    /// Span every supervisor event is recorded under. Required.
    pub log: Option<Span>,
    /// Worker program; defaults to [`default_worker_program`].
    pub program: Option<PathBuf>,
    pub args: Vec<String>,
    pub restart: RestartPolicy,
    /// Upper bound on restarts with `RestartPolicy::Always`; `None` is
    /// unbounded.
    pub max_restarts: Option<u64>,
}

impl WorkerConfig {
    pub fn new(log: Span) -> Self {
        Self {
            log: Some(log),
            ..Self::default()
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = Some(program.into());
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_restart(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    pub fn with_max_restarts(mut self, max_restarts: u64) -> Self {
        self.max_restarts = Some(max_restarts);
        self
    }
}

/// Locate the worker binary next to the current executable.
///
/// Test executables live one level deeper (`target/<profile>/deps`), so the
/// parent of a `deps` directory is searched too. Falls back to a bare name
/// resolved through `PATH`.
pub fn default_worker_program() -> PathBuf {
    let name = format!("{WORKER_BIN}{}", std::env::consts::EXE_SUFFIX);

    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        let mut candidates = vec![dir.join(&name)];
        if dir.file_name() == Some(OsStr::new("deps")) {
            if let Some(parent) = dir.parent() {
                candidates.push(parent.join(&name));
            }
        }
        if let Some(found) = candidates.into_iter().find(|p| p.is_file()) {
            return found;
        }
    }

    PathBuf::from(name)
}

/// Create a supervisor running the `aspawn-worker` program and return a
/// handle to it.
///
/// The first worker process is launched before this returns; its readiness
/// is not awaited. Fails if `config.log` is missing or the program cannot
/// be launched.
///
/// # Panics
///
/// Must be called from within a Tokio runtime.
pub fn create_worker(config: WorkerConfig) -> Result<WorkerHandle> {
    require_log(&config)?;
    let program = config
        .program
        .clone()
        .unwrap_or_else(default_worker_program);
    let backend = ProcessBackend::new(program, config.args.clone());
    create_worker_with_backend(config, backend)
}

/// Like [`create_worker`], with an explicit process backend.
pub fn create_worker_with_backend<B>(config: WorkerConfig, backend: B) -> Result<WorkerHandle>
where
    B: WorkerBackend + 'static,
{
    let span = require_log(&config)?;

    let core = SupervisorCore::new(config.restart, config.max_restarts);
    let (requests_tx, requests_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(core.status());

    let mut supervisor = Supervisor::new(core, backend, requests_rx, status_tx);
    span.in_scope(|| supervisor.start())?;

    tokio::spawn(supervisor.run().instrument(span));

    Ok(WorkerHandle {
        requests: requests_tx,
        status: status_rx,
        next_id: Arc::new(AtomicU64::new(1)),
    })
}

fn require_log(config: &WorkerConfig) -> Result<Span> {
    config
        .log
        .clone()
        .ok_or_else(|| AspawnError::InvalidArgument("\"log\" argument is required".into()))
}

/// Handle to a supervised worker.
///
/// Clones share the supervisor and the id sequence. Dropping the last
/// clone destroys the worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    requests: mpsc::UnboundedSender<HandleRequest>,
    status: watch::Receiver<WorkerStatus>,
    next_id: Arc<AtomicU64>,
}

impl WorkerHandle {
    /// Submit a command; `continuation` later receives its single outcome.
    ///
    /// Argument errors and a missing live worker are returned here and the
    /// continuation is never invoked.
    pub fn submit<I, S, F>(&self, argv: I, options: &SpawnOptions, continuation: F) -> Result<RequestId>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
        F: FnOnce(std::result::Result<Output, CommandError>) + Send + 'static,
    {
        let argv = validate_argv(argv)?;
        let env = resolve_env(options)?;

        let state = self.state();
        if !state.accepts_commands() {
            debug!(%state, "rejecting submission");
            return Err(AspawnError::NotRunning);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let command = Command { id, argv, env };

        self.requests
            .send(HandleRequest::Submit(Submission::new(command, continuation)))
            .map_err(|_| AspawnError::NotRunning)?;

        Ok(id)
    }

    /// Submit a command and get a future-like handle for its outcome.
    pub fn exec<I, S>(&self, argv: I, options: &SpawnOptions) -> Result<PendingCommand>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let (tx, rx) = oneshot::channel();
        let id = self.submit(argv, options, move |outcome| {
            let _ = tx.send(outcome);
        })?;
        Ok(PendingCommand { id, rx })
    }

    /// Kill the worker and abort every pending command. Idempotent.
    pub fn destroy(&self) {
        if self.requests.send(HandleRequest::Destroy).is_err() {
            debug!("destroy on a finished supervisor; ignoring");
        }
    }

    /// Register an observer for worker exits (clean or unexpected).
    pub fn on_exit(&self, observer: impl Fn(&WorkerExit) + Send + 'static) {
        let _ = self
            .requests
            .send(HandleRequest::ObserveExit(Box::new(observer)));
    }

    pub fn status(&self) -> WorkerStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> WorkerState {
        self.status.borrow().state
    }

    pub fn pid(&self) -> Option<u32> {
        self.status.borrow().pid
    }

    /// Wait until the published status satisfies `pred`. Returns the last
    /// status if the supervisor finishes first.
    pub async fn wait_for_state(&self, mut pred: impl FnMut(&WorkerStatus) -> bool) -> WorkerStatus {
        let mut rx = self.status.clone();
        let found = rx
            .wait_for(|status| pred(status))
            .await
            .map(|status| status.clone());
        found.unwrap_or_else(|_| rx.borrow().clone())
    }

    /// Wait until the supervisor reaches `Destroyed` or `Failed`.
    pub async fn wait_destroyed(&self) -> WorkerStatus {
        self.wait_for_state(|status| status.state.is_terminal())
            .await
    }
}

/// Outcome of a command submitted through [`WorkerHandle::exec`].
#[derive(Debug)]
pub struct PendingCommand {
    id: RequestId,
    rx: oneshot::Receiver<std::result::Result<Output, CommandError>>,
}

impl PendingCommand {
    pub fn id(&self) -> RequestId {
        self.id
    }

    pub async fn wait(self) -> std::result::Result<Output, CommandError> {
        self.rx
            .await
            .unwrap_or(Err(CommandError::SupervisorClosed))
    }
}
