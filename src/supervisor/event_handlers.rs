// src/supervisor/event_handlers.rs

//! Event handling logic for the supervisor core.

use tracing::{debug, error, info, warn};

use crate::errors::CommandError;
use crate::protocol::{MalformedMessage, Request, WorkerMessage};
use crate::supervisor::core::SupervisorCore;
use crate::supervisor::pending::PendingEntry;
use crate::supervisor::{CoreStep, Submission, SupervisorCommand, WorkerExit};
use crate::types::{ExitInfo, WorkerState};

/// Handle a command submission.
///
/// - With a live worker, the command is recorded as pending and sent.
/// - After `destroy()`, it resolves immediately as destroyed.
/// - Without a live worker (the supervisor failed), it resolves as not
///   running. The handle normally rejects such submissions synchronously;
///   this covers ones that raced with the state change.
pub fn handle_submit(core: &mut SupervisorCore, submission: Submission) -> CoreStep {
    let Submission {
        command,
        continuation,
    } = submission;
    let id = command.id;

    let refusal = if core.destroyed {
        Some(CommandError::WorkerDestroyed)
    } else if core.live.is_none() {
        Some(CommandError::NotRunning)
    } else {
        None
    };

    if let Some(err) = refusal {
        debug!(id, state = %core.state, "command submitted without a live worker; refusing");
        return CoreStep::new(
            vec![SupervisorCommand::Deliver {
                id,
                continuation,
                outcome: Err(err),
            }],
            core.keep_running(),
        );
    }

    debug!(id, argv = ?command.argv, "issuing command");

    let request = Request::exec(command.clone());
    if let Err(rejected) = core.pending.insert(PendingEntry::new(command, continuation)) {
        error!(id, "duplicate request id; refusing command");
        return CoreStep::new(
            vec![SupervisorCommand::Deliver {
                id,
                continuation: rejected.continuation,
                outcome: Err(CommandError::DuplicateId(id)),
            }],
            core.keep_running(),
        );
    }

    CoreStep::new(vec![SupervisorCommand::Send(request)], true)
}

/// Handle `destroy()`: kill the live worker once. All cleanup happens when
/// its exit is reported.
pub fn handle_destroy(core: &mut SupervisorCore) -> CoreStep {
    if core.destroyed || core.live.is_none() {
        debug!(state = %core.state, "destroy requested with no live worker; ignoring");
        return CoreStep::new(Vec::new(), core.keep_running());
    }

    info!(pid = ?core.pid, pending = core.pending.len(), "destroying");
    core.destroyed = true;
    core.state = WorkerState::Terminating;

    CoreStep::new(vec![SupervisorCommand::Kill], true)
}

/// Handle a successful launch by the backend.
pub fn handle_started(core: &mut SupervisorCore, generation: u64, pid: Option<u32>) -> CoreStep {
    if generation != core.generation {
        debug!(generation, current = core.generation, "ignoring start of stale worker process");
        return CoreStep::new(Vec::new(), core.keep_running());
    }

    core.live = Some(generation);
    core.pid = pid;
    core.state = WorkerState::Running;
    info!(generation, pid = ?pid, "worker process started");

    CoreStep::new(Vec::new(), true)
}

/// Handle a failed launch. Without a process there is nothing left to
/// supervise, so the core becomes `Failed`.
pub fn handle_start_failed(core: &mut SupervisorCore, generation: u64, error: String) -> CoreStep {
    error!(generation, error = %error, "failed to start worker process");

    core.live = None;
    core.pid = None;
    core.state = WorkerState::Failed;

    let commands = abort_pending(core, CommandError::NotRunning);
    CoreStep::new(commands, false)
}

/// Handle a message from the worker.
pub fn handle_message(
    core: &mut SupervisorCore,
    message: Result<WorkerMessage, MalformedMessage>,
) -> CoreStep {
    let mut commands = Vec::new();

    match message {
        Err(malformed) => {
            warn!(
                line = %malformed.line,
                reason = %malformed.reason,
                "unrecognized worker message"
            );
        }
        Ok(WorkerMessage::Ready { pid }) => {
            debug!(pid, "worker process ready");
        }
        Ok(WorkerMessage::Completed(response)) => {
            let id = response.id;
            match core.pending.remove(id) {
                None => {
                    warn!(id, "unknown command in worker message");
                }
                Some(entry) => {
                    let outcome = response.into_outcome();
                    debug!(
                        id,
                        elapsed_ms = entry.elapsed().as_millis() as u64,
                        ok = outcome.is_ok(),
                        "command completed"
                    );
                    commands.push(SupervisorCommand::Deliver {
                        id,
                        continuation: entry.continuation,
                        outcome,
                    });
                }
            }
        }
    }

    CoreStep::new(commands, core.keep_running())
}

/// Handle the exit of a worker process.
///
/// - Clears the live handle.
/// - After `destroy()`: notifies a clean exit and becomes `Destroyed`.
/// - Otherwise: notifies an unexpected exit and restarts when the policy
///   allows (`Running -> Restarting -> Running`), else becomes `Failed`.
/// - In both cases every pending command is aborted.
pub fn handle_exit(core: &mut SupervisorCore, generation: u64, status: ExitInfo) -> CoreStep {
    if core.live != Some(generation) {
        debug!(generation, %status, "ignoring exit of stale worker process");
        return CoreStep::new(Vec::new(), core.keep_running());
    }

    core.live = None;
    core.pid = None;

    let mut commands = vec![SupervisorCommand::ClearWorker];

    let abort = if core.destroyed {
        info!(generation, %status, "worker process exited (destroyed)");
        core.state = WorkerState::Destroyed;
        commands.push(SupervisorCommand::Notify(WorkerExit::Destroyed));
        CommandError::WorkerDestroyed
    } else {
        warn!(generation, %status, "worker process exited unexpectedly");
        commands.push(SupervisorCommand::Notify(WorkerExit::Unexpected(status)));

        if core.may_restart() {
            core.restarts += 1;
            core.state = WorkerState::Restarting;
            commands.extend(core.start().commands);
        } else {
            warn!(
                restarts = core.restarts,
                policy = ?core.restart,
                "not restarting worker process"
            );
            core.state = WorkerState::Failed;
        }
        CommandError::WorkerExited
    };

    commands.extend(abort_pending(core, abort));
    CoreStep::new(commands, core.keep_running())
}

/// Fail every pending command with the same error.
fn abort_pending(core: &mut SupervisorCore, err: CommandError) -> Vec<SupervisorCommand> {
    core.pending
        .drain()
        .into_iter()
        .map(|entry| {
            debug!(id = entry.id(), argv = ?entry.command.argv, error = %err, "command aborted");
            SupervisorCommand::Deliver {
                id: entry.id(),
                continuation: entry.continuation,
                outcome: Err(err.clone()),
            }
        })
        .collect()
}
