// src/supervisor/runtime.rs

use std::fmt;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::errors::{AspawnError, Result};
use crate::exec::{ProcessHandle, WorkerBackend};

use super::core::SupervisorCore;
use super::{
    ExitObserver, ProcessEvent, Submission, SupervisorCommand, SupervisorEvent, WorkerStatus,
};

/// Requests sent by [`super::WorkerHandle`] clones to the supervisor task.
pub(crate) enum HandleRequest {
    Submit(Submission),
    Destroy,
    ObserveExit(ExitObserver),
}

impl fmt::Debug for HandleRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submit(submission) => f.debug_tuple("Submit").field(submission).finish(),
            Self::Destroy => f.write_str("Destroy"),
            Self::ObserveExit(_) => f.write_str("ObserveExit"),
        }
    }
}

/// Drives the supervisor state machine in response to handle requests and
/// process events, and delegates process construction to a `WorkerBackend`.
///
/// This is a pure IO shell around `SupervisorCore`, which contains all the
/// supervision semantics. This struct owns the live process handle and the
/// exit observers, and is the only place continuations are invoked.
pub struct Supervisor<B: WorkerBackend> {
    core: SupervisorCore,
    backend: B,
    process: Option<ProcessHandle>,
    observers: Vec<ExitObserver>,
    requests_rx: mpsc::UnboundedReceiver<HandleRequest>,
    events_tx: mpsc::UnboundedSender<ProcessEvent>,
    events_rx: mpsc::UnboundedReceiver<ProcessEvent>,
    status_tx: watch::Sender<WorkerStatus>,
}

impl<B: WorkerBackend> fmt::Debug for Supervisor<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("core", &self.core)
            .field("process", &self.process)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

impl<B: WorkerBackend> Supervisor<B> {
    pub(crate) fn new(
        core: SupervisorCore,
        backend: B,
        requests_rx: mpsc::UnboundedReceiver<HandleRequest>,
        status_tx: watch::Sender<WorkerStatus>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            core,
            backend,
            process: None,
            observers: Vec::new(),
            requests_rx,
            events_tx,
            events_rx,
            status_tx,
        }
    }

    /// Launch the first worker process.
    ///
    /// Unlike restarts, a failure here is reported to the caller of
    /// `create_worker` instead of only moving the core to `Failed`.
    pub(crate) fn start(&mut self) -> Result<()> {
        let step = self.core.start();
        for command in step.commands {
            let SupervisorCommand::StartWorker { generation } = command else {
                continue;
            };

            match self.backend.start(generation, self.events_tx.clone()) {
                Ok(handle) => {
                    let pid = handle.pid();
                    self.process = Some(handle);
                    self.dispatch(SupervisorEvent::WorkerStarted { generation, pid });
                }
                Err(err) => {
                    let message = err.to_string();
                    self.dispatch(SupervisorEvent::StartFailed {
                        generation,
                        error: message,
                    });
                    self.publish_status();
                    return Err(err);
                }
            }
        }

        self.publish_status();
        if self.process.is_none() {
            return Err(AspawnError::NotRunning);
        }
        Ok(())
    }

    /// Main event loop.
    ///
    /// - Consumes handle requests and process events.
    /// - Feeds them into the core.
    /// - Executes commands returned by the core.
    ///
    /// Returns once the worker is destroyed or the supervisor has failed.
    pub async fn run(mut self) {
        info!(status = ?self.core.status(), "supervisor started");

        let mut handles_open = true;

        loop {
            // Requests first: an observer registered before a crash must see it.
            let event = tokio::select! {
                biased;

                request = self.requests_rx.recv(), if handles_open => match request {
                    Some(HandleRequest::Submit(submission)) => SupervisorEvent::Submit(submission),
                    Some(HandleRequest::Destroy) => SupervisorEvent::Destroy,
                    Some(HandleRequest::ObserveExit(observer)) => {
                        self.observers.push(observer);
                        continue;
                    }
                    None => {
                        info!("all worker handles dropped; destroying");
                        handles_open = false;
                        SupervisorEvent::Destroy
                    }
                },
                Some(event) = self.events_rx.recv() => SupervisorEvent::Process(event),
            };

            let keep_running = self.dispatch(event);
            self.publish_status();

            if !keep_running {
                info!(state = %self.core.state(), "supervisor reached terminal state");
                break;
            }
        }

        self.drain_requests();
        self.publish_status();
        info!("supervisor exiting");
    }

    /// Feed one event into the core and execute the resulting commands,
    /// including any follow-up events they produce.
    fn dispatch(&mut self, event: SupervisorEvent) -> bool {
        debug!(?event, "supervisor received event");

        let step = self.core.step(event);
        let mut keep_running = step.keep_running;

        for command in step.commands {
            if let Some(follow_up) = self.execute(command) {
                keep_running &= self.dispatch(follow_up);
            }
        }

        keep_running
    }

    /// Execute a single command from the core.
    fn execute(&mut self, command: SupervisorCommand) -> Option<SupervisorEvent> {
        match command {
            SupervisorCommand::StartWorker { generation } => {
                match self.backend.start(generation, self.events_tx.clone()) {
                    Ok(handle) => {
                        let pid = handle.pid();
                        self.process = Some(handle);
                        Some(SupervisorEvent::WorkerStarted { generation, pid })
                    }
                    Err(err) => Some(SupervisorEvent::StartFailed {
                        generation,
                        error: err.to_string(),
                    }),
                }
            }
            SupervisorCommand::ClearWorker => {
                self.process = None;
                None
            }
            SupervisorCommand::Send(request) => {
                match &self.process {
                    // A failed send leaves the command pending; the exit of
                    // the broken process aborts it.
                    Some(process) => {
                        if let Err(err) = process.send(request) {
                            warn!(error = %err, "failed to send request to worker");
                        }
                    }
                    None => warn!(id = request.id(), "no worker process to send request to"),
                }
                None
            }
            SupervisorCommand::Kill => {
                if let Some(process) = &mut self.process {
                    if !process.kill() {
                        debug!(generation = process.generation(), "worker already exiting");
                    }
                }
                None
            }
            SupervisorCommand::Deliver {
                id,
                continuation,
                outcome,
            } => {
                debug!(id, ok = outcome.is_ok(), "delivering outcome");
                continuation(outcome);
                None
            }
            SupervisorCommand::Notify(exit) => {
                for observer in &self.observers {
                    observer(&exit);
                }
                None
            }
        }
    }

    /// Resolve submissions that were queued while the loop was finishing.
    fn drain_requests(&mut self) {
        self.requests_rx.close();
        while let Ok(request) = self.requests_rx.try_recv() {
            if let HandleRequest::Submit(submission) = request {
                self.dispatch(SupervisorEvent::Submit(submission));
            }
        }
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(self.core.status());
    }
}
