//! In-process stand-in for the `aspawn-worker` program.
//!
//! Commands are interpreted by their first argument:
//! - `echo ARGS...`: succeeds with `ARGS` joined by spaces plus a newline
//! - `exit N`: exits with code `N` and stderr `exit N\n`
//! - `signal NAME`: killed by signal `NAME` after printing `partial\n`
//! - `hang`: never answers
//! - anything else: launch failure

use std::sync::{Arc, Mutex, MutexGuard};

use aspawn::errors::{AspawnError, Result};
use aspawn::exec::{ProcessHandle, WorkerBackend};
use aspawn::protocol::{Command, Request, Response, WorkerMessage};
use aspawn::supervisor::ProcessEvent;
use aspawn::types::ExitInfo;
use tokio::sync::{mpsc, oneshot};

#[derive(Default)]
struct State {
    starts: u64,
    kills: u64,
    fail_starts: bool,
    next_pid: u32,
    requests: Vec<Command>,
    current: Option<Live>,
}

struct Live {
    generation: u64,
    events: mpsc::UnboundedSender<ProcessEvent>,
    crash: mpsc::UnboundedSender<ExitInfo>,
}

/// Test-side control over the fake worker processes.
#[derive(Clone, Default)]
pub struct FakeWorker {
    state: Arc<Mutex<State>>,
}

/// `WorkerBackend` handed to `create_worker_with_backend`.
pub struct FakeBackend {
    state: Arc<Mutex<State>>,
}

impl FakeWorker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(&self) -> FakeBackend {
        FakeBackend {
            state: Arc::clone(&self.state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Number of processes started so far.
    pub fn starts(&self) -> u64 {
        self.lock().starts
    }

    /// Number of kill requests received.
    pub fn kills(&self) -> u64 {
        self.lock().kills
    }

    /// Every command received, across all processes, in arrival order.
    pub fn requests(&self) -> Vec<Command> {
        self.lock().requests.clone()
    }

    /// Make every following start fail.
    pub fn fail_starts(&self) {
        self.lock().fail_starts = true;
    }

    /// Terminate the current process as if it crashed.
    pub fn crash(&self, status: ExitInfo) {
        if let Some(live) = &self.lock().current {
            let _ = live.crash.send(status);
        }
    }

    /// Deliver a raw line as if the current process had written it.
    pub fn emit_line(&self, line: &str) {
        if let Some(live) = &self.lock().current {
            let _ = live
                .events
                .send(ProcessEvent::Message(WorkerMessage::from_line(line)));
        }
    }

    /// Generation of the current process, if one is alive.
    pub fn current_generation(&self) -> Option<u64> {
        self.lock().current.as_ref().map(|live| live.generation)
    }
}

impl WorkerBackend for FakeBackend {
    fn start(
        &mut self,
        generation: u64,
        events: mpsc::UnboundedSender<ProcessEvent>,
    ) -> Result<ProcessHandle> {
        let mut state = self.state.lock().unwrap();
        if state.fail_starts {
            return Err(AspawnError::WorkerSpawn {
                program: "fake-worker".into(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "start refused"),
            });
        }

        state.starts += 1;
        state.next_pid += 1;
        let pid = 10_000 + state.next_pid;

        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = oneshot::channel();
        let (crash_tx, crash_rx) = mpsc::unbounded_channel();

        state.current = Some(Live {
            generation,
            events: events.clone(),
            crash: crash_tx,
        });

        let _ = events.send(ProcessEvent::Message(Ok(WorkerMessage::Ready { pid })));

        tokio::spawn(serve(
            generation,
            Arc::clone(&self.state),
            events,
            requests_rx,
            kill_rx,
            crash_rx,
        ));

        Ok(ProcessHandle::new(generation, Some(pid), requests_tx, kill_tx))
    }
}

async fn serve(
    generation: u64,
    state: Arc<Mutex<State>>,
    events: mpsc::UnboundedSender<ProcessEvent>,
    mut requests: mpsc::UnboundedReceiver<Request>,
    mut kill_rx: oneshot::Receiver<()>,
    mut crash_rx: mpsc::UnboundedReceiver<ExitInfo>,
) {
    let status = loop {
        tokio::select! {
            request = requests.recv() => match request {
                Some(Request::Exec(command)) => {
                    state.lock().unwrap().requests.push(command.clone());
                    if let Some(response) = answer(&command) {
                        let _ = events.send(ProcessEvent::Message(Ok(WorkerMessage::Completed(response))));
                    }
                }
                // Handle dropped: behaves like stdin EOF.
                None => break ExitInfo::exited(0),
            },
            killed = &mut kill_rx => {
                if killed.is_ok() {
                    state.lock().unwrap().kills += 1;
                    break ExitInfo::signaled("SIGKILL");
                }
                break ExitInfo::exited(0);
            }
            Some(status) = crash_rx.recv() => break status,
        }
    };

    {
        let mut state = state.lock().unwrap();
        if state
            .current
            .as_ref()
            .is_some_and(|live| live.generation == generation)
        {
            state.current = None;
        }
    }

    let _ = events.send(ProcessEvent::Exited { generation, status });
}

fn answer(command: &Command) -> Option<Response> {
    let id = command.id;
    let (program, args) = command.argv.split_first()?;
    let response = |stdout: String, stderr: String, code, signal| Response {
        id,
        stdout,
        stderr,
        code,
        signal,
        error: None,
    };

    match program.as_str() {
        "echo" => Some(response(format!("{}\n", args.join(" ")), String::new(), Some(0), None)),
        "exit" => {
            let code = args.first().and_then(|c| c.parse().ok()).unwrap_or(1);
            Some(response(String::new(), format!("exit {code}\n"), Some(code), None))
        }
        "signal" => {
            let name = args.first().cloned().unwrap_or_else(|| "SIGTERM".into());
            Some(response("partial\n".into(), String::new(), None, Some(name)))
        }
        "hang" => None,
        other => Some(Response::launch_failed(id, format!("{other}: not found"))),
    }
}
