#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use aspawn::{WorkerConfig, WorkerExit, WorkerHandle, create_worker};
use aspawn_test_utils::{init_tracing, test_span};

/// Path of the worker binary built alongside these tests.
pub const WORKER_BIN: &str = env!("CARGO_BIN_EXE_aspawn-worker");

/// Start a supervisor around the real `aspawn-worker` binary.
pub fn real_worker() -> WorkerHandle {
    init_tracing();
    create_worker(WorkerConfig::new(test_span()).with_program(WORKER_BIN))
        .expect("failed to start aspawn-worker")
}

/// Record every exit notification of `worker`.
pub fn record_exits(worker: &WorkerHandle) -> Arc<Mutex<Vec<WorkerExit>>> {
    let exits = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&exits);
    worker.on_exit(move |exit| sink.lock().unwrap().push(exit.clone()));
    exits
}
