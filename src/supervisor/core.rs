// src/supervisor/core.rs

//! Pure supervisor state machine.
//!
//! This module contains a synchronous, deterministic "core" that consumes
//! [`SupervisorEvent`]s and produces:
//! - an updated core state (lifecycle state, pending table, counters)
//! - a list of [`SupervisorCommand`]s describing what the IO shell should
//!   do next (start a process, send a request, kill, deliver outcomes)
//!
//! The async shell (`supervisor::runtime::Supervisor`) is responsible for
//! reading events from channels, owning the process handle and invoking
//! continuations and exit observers.
//!
//! The core has no channels, no Tokio types, and does not perform any IO,
//! so it is unit tested directly below.

use tracing::info;

use crate::supervisor::event_handlers::{
    handle_destroy, handle_exit, handle_message, handle_start_failed, handle_started,
    handle_submit,
};
use crate::supervisor::pending::PendingTable;
use crate::supervisor::{
    CoreStep, ProcessEvent, SupervisorCommand, SupervisorEvent, WorkerStatus,
};
use crate::types::{RestartPolicy, WorkerState};

/// Pure supervisor state.
#[derive(Debug)]
pub struct SupervisorCore {
    pub(super) state: WorkerState,
    /// Sticky: set by the first `destroy()` and never cleared.
    pub(super) destroyed: bool,
    /// Generation of the most recently requested worker process.
    pub(super) generation: u64,
    /// Generation of the live worker process handle, if there is one.
    pub(super) live: Option<u64>,
    pub(super) pid: Option<u32>,
    pub(super) pending: PendingTable,
    pub(super) restart: RestartPolicy,
    pub(super) max_restarts: Option<u64>,
    pub(super) starts: u64,
    pub(super) restarts: u64,
}

impl SupervisorCore {
    pub fn new(restart: RestartPolicy, max_restarts: Option<u64>) -> Self {
        Self {
            state: WorkerState::Starting,
            destroyed: false,
            generation: 0,
            live: None,
            pid: None,
            pending: PendingTable::new(),
            restart,
            max_restarts,
            starts: 0,
            restarts: 0,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus {
            state: self.state,
            pid: self.pid,
            generation: self.generation,
            starts: self.starts,
            restarts: self.restarts,
            pending: self.pending.len(),
        }
    }

    /// Whether the outer loop has anything left to do.
    pub fn keep_running(&self) -> bool {
        !self.state.is_terminal()
    }

    /// Request a new worker process. Every call allocates a new generation.
    pub fn start(&mut self) -> CoreStep {
        self.generation += 1;
        self.starts += 1;
        if self.state != WorkerState::Restarting {
            self.state = WorkerState::Starting;
        }

        info!(
            generation = self.generation,
            starts = self.starts,
            "forking worker process"
        );

        CoreStep::new(
            vec![SupervisorCommand::StartWorker {
                generation: self.generation,
            }],
            true,
        )
    }

    /// Whether an unexpected exit may be followed by a restart.
    pub(super) fn may_restart(&self) -> bool {
        self.restart == RestartPolicy::Always
            && self.max_restarts.is_none_or(|max| self.restarts < max)
    }

    /// Handle a single event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: SupervisorEvent) -> CoreStep {
        match event {
            SupervisorEvent::Submit(submission) => handle_submit(self, submission),
            SupervisorEvent::Destroy => handle_destroy(self),
            SupervisorEvent::WorkerStarted { generation, pid } => {
                handle_started(self, generation, pid)
            }
            SupervisorEvent::StartFailed { generation, error } => {
                handle_start_failed(self, generation, error)
            }
            SupervisorEvent::Process(ProcessEvent::Message(message)) => {
                handle_message(self, message)
            }
            SupervisorEvent::Process(ProcessEvent::Exited { generation, status }) => {
                handle_exit(self, generation, status)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::errors::{CommandError, Output};
    use crate::protocol::{Command, Response, WorkerMessage};
    use crate::supervisor::{Submission, WorkerExit};
    use crate::types::{ExitInfo, RequestId};

    type Outcomes = Arc<Mutex<Vec<(RequestId, Result<Output, CommandError>)>>>;

    fn running_core() -> SupervisorCore {
        let mut core = SupervisorCore::new(RestartPolicy::Always, None);
        core.start();
        core.step(SupervisorEvent::WorkerStarted {
            generation: 1,
            pid: Some(100),
        });
        core
    }

    fn submit(core: &mut SupervisorCore, id: RequestId, outcomes: &Outcomes) -> CoreStep {
        let outcomes = Arc::clone(outcomes);
        let command = Command {
            id,
            argv: vec!["echo".into(), format!("{id}")],
            env: BTreeMap::new(),
        };
        core.step(SupervisorEvent::Submit(Submission::new(command, move |r| {
            outcomes.lock().unwrap().push((id, r));
        })))
    }

    fn completed(id: RequestId, code: Option<i32>) -> SupervisorEvent {
        SupervisorEvent::Process(ProcessEvent::Message(Ok(WorkerMessage::Completed(
            Response {
                id,
                stdout: format!("{id}\n"),
                stderr: String::new(),
                code,
                signal: None,
                error: None,
            },
        ))))
    }

    fn exited(generation: u64) -> SupervisorEvent {
        SupervisorEvent::Process(ProcessEvent::Exited {
            generation,
            status: ExitInfo::signaled("SIGKILL"),
        })
    }

    /// Run every Deliver command; return the rest.
    fn deliver(step: CoreStep) -> Vec<SupervisorCommand> {
        let mut rest = Vec::new();
        for command in step.commands {
            match command {
                SupervisorCommand::Deliver {
                    continuation,
                    outcome,
                    ..
                } => continuation(outcome),
                other => rest.push(other),
            }
        }
        rest
    }

    #[test]
    fn test_start_then_started_is_running() {
        let mut core = SupervisorCore::new(RestartPolicy::Always, None);
        let step = core.start();
        assert!(matches!(
            step.commands.as_slice(),
            [SupervisorCommand::StartWorker { generation: 1 }]
        ));
        assert_eq!(core.state(), WorkerState::Starting);

        core.step(SupervisorEvent::WorkerStarted {
            generation: 1,
            pid: Some(7),
        });
        assert_eq!(core.state(), WorkerState::Running);
        assert_eq!(core.status().pid, Some(7));
    }

    #[test]
    fn test_submit_sends_request_and_records_pending() {
        let mut core = running_core();
        let outcomes = Outcomes::default();

        let step = submit(&mut core, 1, &outcomes);
        assert!(matches!(
            step.commands.as_slice(),
            [SupervisorCommand::Send(req)] if req.id() == 1
        ));
        assert_eq!(core.pending_len(), 1);
        assert!(outcomes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_completion_delivers_exactly_once() {
        let mut core = running_core();
        let outcomes = Outcomes::default();
        submit(&mut core, 1, &outcomes);

        deliver(core.step(completed(1, Some(0))));
        // A duplicate response for the same id is dropped.
        let rest = deliver(core.step(completed(1, Some(0))));
        assert!(rest.is_empty());

        let outcomes = outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].1, Ok(Output::new("1\n", "")));
        assert_eq!(core.pending_len(), 0);
    }

    #[test]
    fn test_duplicate_id_is_refused_without_touching_pending() {
        let mut core = running_core();
        let outcomes = Outcomes::default();
        submit(&mut core, 4, &outcomes);

        let rest = deliver(submit(&mut core, 4, &outcomes));
        assert!(rest.is_empty());
        assert_eq!(core.pending_len(), 1);
        assert_eq!(
            outcomes.lock().unwrap()[0],
            (4, Err(CommandError::DuplicateId(4)))
        );

        // The original command still completes normally.
        deliver(core.step(completed(4, Some(0))));
        assert_eq!(outcomes.lock().unwrap()[1].1, Ok(Output::new("4\n", "")));
    }

    #[test]
    fn test_nonzero_code_is_exec_error() {
        let mut core = running_core();
        let outcomes = Outcomes::default();
        submit(&mut core, 1, &outcomes);
        deliver(core.step(completed(1, Some(2))));

        let outcomes = outcomes.lock().unwrap();
        assert_eq!(outcomes[0].1.as_ref().unwrap_err().code(), Some(2));
    }

    #[test]
    fn test_malformed_and_unknown_messages_are_ignored() {
        let mut core = running_core();
        let outcomes = Outcomes::default();
        submit(&mut core, 1, &outcomes);

        let malformed = SupervisorEvent::Process(ProcessEvent::Message(
            WorkerMessage::from_line("{\"id\": 1}"),
        ));
        let step = core.step(malformed);
        assert!(step.commands.is_empty());
        assert!(step.keep_running);

        let step = core.step(completed(99, Some(0)));
        assert!(step.commands.is_empty());
        assert_eq!(core.pending_len(), 1);
    }

    #[test]
    fn test_unexpected_exit_aborts_pending_and_restarts() {
        let mut core = running_core();
        let outcomes = Outcomes::default();
        for id in 1..=3 {
            submit(&mut core, id, &outcomes);
        }

        let step = core.step(exited(1));
        assert!(step.keep_running);
        assert_eq!(core.state(), WorkerState::Restarting);
        let rest = deliver(step);

        assert!(matches!(rest[0], SupervisorCommand::ClearWorker));
        assert!(matches!(
            &rest[1],
            SupervisorCommand::Notify(WorkerExit::Unexpected(status)) if status.signal.as_deref() == Some("SIGKILL")
        ));
        assert!(matches!(rest[2], SupervisorCommand::StartWorker { generation: 2 }));

        let outcomes = outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 3);
        for (_, outcome) in outcomes.iter() {
            assert_eq!(outcome, &Err(CommandError::WorkerExited));
        }
        assert_eq!(core.pending_len(), 0);
        assert_eq!(core.status().restarts, 1);
    }

    #[test]
    fn test_restart_loops_without_bound_by_default() {
        let mut core = running_core();
        for generation in 1..=20 {
            let step = core.step(exited(generation));
            assert!(step.commands.iter().any(|c| matches!(
                c,
                SupervisorCommand::StartWorker { generation: g } if *g == generation + 1
            )));
            core.step(SupervisorEvent::WorkerStarted {
                generation: generation + 1,
                pid: None,
            });
            assert_eq!(core.state(), WorkerState::Running);
        }
        assert_eq!(core.status().restarts, 20);
    }

    #[test]
    fn test_max_restarts_bounds_restarts() {
        let mut core = SupervisorCore::new(RestartPolicy::Always, Some(1));
        core.start();
        core.step(SupervisorEvent::WorkerStarted { generation: 1, pid: None });

        core.step(exited(1));
        core.step(SupervisorEvent::WorkerStarted { generation: 2, pid: None });
        assert_eq!(core.state(), WorkerState::Running);

        let step = core.step(exited(2));
        assert!(!step.keep_running);
        assert_eq!(core.state(), WorkerState::Failed);
        assert!(!step
            .commands
            .iter()
            .any(|c| matches!(c, SupervisorCommand::StartWorker { .. })));
    }

    #[test]
    fn test_restart_policy_never_fails() {
        let mut core = SupervisorCore::new(RestartPolicy::Never, None);
        core.start();
        core.step(SupervisorEvent::WorkerStarted { generation: 1, pid: None });
        let step = core.step(exited(1));
        assert!(!step.keep_running);
        assert_eq!(core.state(), WorkerState::Failed);
    }

    #[test]
    fn test_destroy_kills_once_and_aborts_as_destroyed() {
        let mut core = running_core();
        let outcomes = Outcomes::default();
        submit(&mut core, 1, &outcomes);

        let step = core.step(SupervisorEvent::Destroy);
        assert!(matches!(step.commands.as_slice(), [SupervisorCommand::Kill]));
        assert_eq!(core.state(), WorkerState::Terminating);

        // Second destroy: no duplicate kill.
        let step = core.step(SupervisorEvent::Destroy);
        assert!(step.commands.is_empty());

        let step = core.step(exited(1));
        assert!(!step.keep_running);
        assert_eq!(core.state(), WorkerState::Destroyed);
        let rest = deliver(step);
        assert!(rest
            .iter()
            .any(|c| matches!(c, SupervisorCommand::Notify(WorkerExit::Destroyed))));
        assert!(!rest
            .iter()
            .any(|c| matches!(c, SupervisorCommand::StartWorker { .. })));

        let outcomes = outcomes.lock().unwrap();
        assert_eq!(outcomes[0].1, Err(CommandError::WorkerDestroyed));
    }

    #[test]
    fn test_submit_while_terminating_resolves_destroyed() {
        let mut core = running_core();
        core.step(SupervisorEvent::Destroy);

        let outcomes = Outcomes::default();
        let step = submit(&mut core, 5, &outcomes);
        deliver(step);
        assert_eq!(core.pending_len(), 0);
        assert_eq!(
            outcomes.lock().unwrap()[0].1,
            Err(CommandError::WorkerDestroyed)
        );
    }

    #[test]
    fn test_stale_exit_is_ignored() {
        let mut core = running_core();
        core.step(exited(1));
        core.step(SupervisorEvent::WorkerStarted { generation: 2, pid: None });

        // A second exit report for generation 1 must not touch generation 2.
        let step = core.step(exited(1));
        assert!(step.commands.is_empty());
        assert_eq!(core.state(), WorkerState::Running);
    }

    #[test]
    fn test_start_failure_is_terminal() {
        let mut core = running_core();
        core.step(exited(1));
        let step = core.step(SupervisorEvent::StartFailed {
            generation: 2,
            error: "no such file".into(),
        });
        assert!(!step.keep_running);
        assert_eq!(core.state(), WorkerState::Failed);

        let outcomes = Outcomes::default();
        deliver(submit(&mut core, 9, &outcomes));
        assert_eq!(outcomes.lock().unwrap()[0].1, Err(CommandError::NotRunning));
    }
}
