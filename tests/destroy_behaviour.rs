// tests/destroy_behaviour.rs

#![cfg(unix)]

mod common;
use crate::common::{real_worker, record_exits};

use aspawn::{AspawnError, CommandError, SpawnOptions, WorkerExit, WorkerState};
use aspawn_test_utils::with_timeout;

#[tokio::test]
async fn test_destroy_aborts_pending_as_destroyed() {
    let worker = real_worker();
    let exits = record_exits(&worker);
    let options = SpawnOptions::default();

    let first = worker.exec(["sleep", "5"], &options).unwrap();
    let second = worker.exec(["sleep", "5"], &options).unwrap();
    with_timeout(worker.wait_for_state(|s| s.pending == 2)).await;

    worker.destroy();

    for command in [first, second] {
        let err = with_timeout(command.wait()).await.unwrap_err();
        assert_eq!(err, CommandError::WorkerDestroyed);
        assert_eq!(err.to_string(), "worker process was destroyed");
    }

    let status = with_timeout(worker.wait_destroyed()).await;
    assert_eq!(status.state, WorkerState::Destroyed);
    assert_eq!(status.restarts, 0);
    assert_eq!(*exits.lock().unwrap(), vec![WorkerExit::Destroyed]);
}

#[tokio::test]
async fn test_destroy_twice_is_same_as_once() {
    let worker = real_worker();
    let exits = record_exits(&worker);

    worker.destroy();
    worker.destroy();

    let status = with_timeout(worker.wait_destroyed()).await;
    assert_eq!(status.state, WorkerState::Destroyed);
    assert_eq!(status.starts, 1);

    // A third call after teardown is still harmless.
    worker.destroy();
    assert_eq!(exits.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_submit_after_destroy_fails_fast() {
    let worker = real_worker();
    worker.destroy();
    with_timeout(worker.wait_destroyed()).await;

    let err = worker
        .exec(["echo", "too late"], &SpawnOptions::default())
        .unwrap_err();
    assert!(matches!(err, AspawnError::NotRunning), "{err:?}");
}
