// src/supervisor/mod.rs

//! Host-side supervision of the worker process.
//!
//! The supervisor keeps exactly one worker process alive, correlates
//! command results back to their continuations by request id, and fails
//! every outstanding command when the worker goes away.
//!
//! The pure state machine lives in [`core`] (with the per-event logic in
//! [`event_handlers`]); the async/IO shell is [`runtime::Supervisor`];
//! callers talk to it through a [`WorkerHandle`].

use std::fmt;

use crate::errors::{CommandError, Output};
use crate::protocol::{Command, MalformedMessage, Request, WorkerMessage};
use crate::types::{ExitInfo, RequestId, WorkerState};

pub mod core;
pub mod event_handlers;
pub mod handle;
pub mod options;
pub mod pending;
pub mod runtime;

pub use self::core::SupervisorCore;
pub use handle::{PendingCommand, WorkerConfig, WorkerHandle, create_worker, create_worker_with_backend};
pub use options::SpawnOptions;
pub use pending::{PendingEntry, PendingTable};
pub use runtime::Supervisor;

/// Callback receiving the single terminal outcome of a command.
pub type Continuation = Box<dyn FnOnce(Result<Output, CommandError>) + Send + 'static>;

/// Callback registered through [`WorkerHandle::on_exit`].
pub type ExitObserver = Box<dyn Fn(&WorkerExit) + Send + 'static>;

/// A validated command together with the continuation awaiting it.
pub struct Submission {
    pub command: Command,
    pub continuation: Continuation,
}

impl Submission {
    pub fn new(
        command: Command,
        continuation: impl FnOnce(Result<Output, CommandError>) + Send + 'static,
    ) -> Self {
        Self {
            command,
            continuation: Box::new(continuation),
        }
    }
}

impl fmt::Debug for Submission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Submission")
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

/// Lifecycle notification emitted whenever the worker process exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// Clean exit following `destroy()`.
    Destroyed,
    /// The worker died on its own; a restart follows if the policy allows.
    Unexpected(ExitInfo),
}

impl WorkerExit {
    pub fn is_clean(&self) -> bool {
        matches!(self, WorkerExit::Destroyed)
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerExit::Destroyed => f.write_str("worker process destroyed"),
            WorkerExit::Unexpected(status) => {
                write!(f, "child unexpectedly exited with {status}")
            }
        }
    }
}

/// Events produced by a running worker process.
#[derive(Debug)]
pub enum ProcessEvent {
    /// A line arrived on the worker's message channel.
    Message(Result<WorkerMessage, MalformedMessage>),
    /// The worker process of the given generation terminated.
    Exited { generation: u64, status: ExitInfo },
}

/// Everything the core state machine reacts to.
#[derive(Debug)]
pub enum SupervisorEvent {
    Submit(Submission),
    Destroy,
    /// The backend launched the process requested by `StartWorker`.
    WorkerStarted { generation: u64, pid: Option<u32> },
    /// The backend could not launch the process requested by `StartWorker`.
    StartFailed { generation: u64, error: String },
    Process(ProcessEvent),
}

/// Command produced by the core, to be executed by the IO shell.
pub enum SupervisorCommand {
    /// Launch a new worker process for this generation.
    StartWorker { generation: u64 },
    /// Release the handle of the process that just exited.
    ClearWorker,
    /// Transmit a request to the current worker process.
    Send(Request),
    /// Forcibly terminate the current worker process.
    Kill,
    /// Invoke a continuation with its outcome.
    Deliver {
        id: RequestId,
        continuation: Continuation,
        outcome: Result<Output, CommandError>,
    },
    /// Tell exit observers about a worker exit.
    Notify(WorkerExit),
}

impl fmt::Debug for SupervisorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartWorker { generation } => f
                .debug_struct("StartWorker")
                .field("generation", generation)
                .finish(),
            Self::ClearWorker => f.write_str("ClearWorker"),
            Self::Send(request) => f.debug_tuple("Send").field(request).finish(),
            Self::Kill => f.write_str("Kill"),
            Self::Deliver { id, outcome, .. } => f
                .debug_struct("Deliver")
                .field("id", id)
                .field("outcome", outcome)
                .finish_non_exhaustive(),
            Self::Notify(exit) => f.debug_tuple("Notify").field(exit).finish(),
        }
    }
}

/// Decision returned by the core after handling a single event.
#[derive(Debug)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<SupervisorCommand>,
    /// Whether the outer supervisor loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    pub fn new(commands: Vec<SupervisorCommand>, keep_running: bool) -> Self {
        Self {
            commands,
            keep_running,
        }
    }
}

/// Snapshot of the supervisor published after every event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStatus {
    pub state: WorkerState,
    /// Pid of the live worker process, if any.
    pub pid: Option<u32>,
    /// Generation of the most recently started worker process.
    pub generation: u64,
    pub starts: u64,
    pub restarts: u64,
    /// Number of commands awaiting an outcome.
    pub pending: usize,
}
