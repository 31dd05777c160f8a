// src/exec/backend.rs

//! Pluggable worker backend abstraction.
//!
//! The supervisor talks to a `WorkerBackend` instead of spawning processes
//! itself. This makes it easy to swap in a fake worker in tests while
//! keeping the production implementation in [`super::process`].
//!
//! - `ProcessBackend` is the default implementation used by `aspawn`. It
//!   launches the worker program and bridges its pipes.
//! - Tests can provide their own `WorkerBackend` that, for example, answers
//!   requests directly and simulates crashes on demand.

use tokio::sync::{mpsc, oneshot};

use crate::errors::{AspawnError, Result};
use crate::protocol::Request;
use crate::supervisor::ProcessEvent;

/// Trait abstracting how worker processes are launched.
pub trait WorkerBackend: Send {
    /// Launch a worker process for `generation`.
    ///
    /// The implementation must:
    /// - forward every request sent through the returned handle to the
    ///   worker, in order
    /// - report each worker message as `ProcessEvent::Message` on `events`
    /// - report exactly one `ProcessEvent::Exited` carrying `generation`
    ///   once the worker is gone, including after `ProcessHandle::kill`
    fn start(
        &mut self,
        generation: u64,
        events: mpsc::UnboundedSender<ProcessEvent>,
    ) -> Result<ProcessHandle>;
}

/// The supervisor's handle on one worker process instance.
///
/// A restart replaces the handle; it is never reused for another process.
#[derive(Debug)]
pub struct ProcessHandle {
    generation: u64,
    pid: Option<u32>,
    requests: mpsc::UnboundedSender<Request>,
    kill: Option<oneshot::Sender<()>>,
}

impl ProcessHandle {
    pub fn new(
        generation: u64,
        pid: Option<u32>,
        requests: mpsc::UnboundedSender<Request>,
        kill: oneshot::Sender<()>,
    ) -> Self {
        Self {
            generation,
            pid,
            requests,
            kill: Some(kill),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Queue a request for the worker. Never blocks.
    pub fn send(&self, request: Request) -> Result<()> {
        self.requests.send(request).map_err(|e| {
            AspawnError::Protocol(format!(
                "worker request channel closed; command {} not sent",
                e.0.id()
            ))
        })
    }

    /// Ask for the process to be killed. Only the first call has an effect;
    /// returns whether a kill request was delivered.
    pub fn kill(&mut self) -> bool {
        match self.kill.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::protocol::Command;

    fn handle() -> (
        ProcessHandle,
        mpsc::UnboundedReceiver<Request>,
        oneshot::Receiver<()>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = oneshot::channel();
        (ProcessHandle::new(3, Some(42), tx, kill_tx), rx, kill_rx)
    }

    #[test]
    fn test_kill_only_once() {
        let (mut handle, _rx, mut kill_rx) = handle();
        assert!(handle.kill());
        assert!(!handle.kill());
        assert!(kill_rx.try_recv().is_ok());
    }

    #[test]
    fn test_send_after_worker_gone_fails() {
        let (handle, rx, _kill_rx) = handle();
        drop(rx);
        let request = Request::exec(Command {
            id: 8,
            argv: vec!["true".into()],
            env: BTreeMap::new(),
        });
        let err = handle.send(request).unwrap_err();
        assert!(err.to_string().contains("command 8"));
        assert_eq!(handle.generation(), 3);
        assert_eq!(handle.pid(), Some(42));
    }
}
